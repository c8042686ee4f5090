pub mod api_key;
pub mod credential;
pub mod identity;
pub mod query_job;
pub mod role;
pub mod scoped_credential;

pub use api_key::{ApiKeyBinding, SecretEntry, SecretPayload};
pub use credential::Credential;
pub use identity::{AuthStrategy, VerifiedIdentity};
pub use query_job::{
    JobId, JobState, JobStatus, MalformedRow, QuerySubmission, ResultPage, ResultSet,
    ResultSetBuilder,
};
pub use role::{RoleBinding, RoleBindingTable, RoleId, RoleSignal, RoleTier};
pub use scoped_credential::ScopedCredential;
