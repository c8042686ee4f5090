pub mod broker;
pub mod error;
pub mod formatter;
pub mod identity_cache;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod provisioning;
pub mod role_mapper;
pub mod verifier;

pub use broker::CredentialBroker;
pub use error::ProxyError;
pub use identity_cache::IdentityCache;
pub use orchestrator::{PollControl, QueryFailure, QueryOrchestrator, QueryOutcome, QueryRequest};
pub use pipeline::{Collaborators, PipelineOutcome, PipelineRequest, QueryPipeline};
pub use provisioning::{ApiKeyProvisioner, ProvisionError, ProvisionRequest, ProvisionedKey};
pub use role_mapper::RoleMapper;
pub use verifier::CredentialVerifier;
