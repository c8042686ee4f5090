//! Collaborator contracts and their AWS implementations.

pub mod athena;
pub mod cognito;
pub mod dynamodb;
pub mod jwks;
pub mod sdk;
pub mod secrets_manager;
pub mod sts;

pub use athena::{AthenaBackendFactory, QueryBackend, QueryBackendFactory};
pub use cognito::{CognitoClient, IdentityProvider, TokenSet, UserProfile};
pub use dynamodb::{DynamoDbMappingStore, MappingStore};
pub use jwks::{JwksKeySource, KeySource, KeySourceError, StaticKeySource};
pub use sdk::{load_sdk_config, AwsError};
pub use secrets_manager::{SecretStore, SecretsManagerClient};
pub use sts::{RoleAssumer, StsClient};
