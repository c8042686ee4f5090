//! Naming convention and storage schema shared by the API-key verifier and
//! the `provision-api-key` binary.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Every API-key secret name starts with this prefix.
pub const SECRET_PREFIX: &str = "lf-apikey-";

/// Tag key marking a secret as an API-key secret.
pub const KEY_TYPE_TAG: &str = "LFAPIKeyType";

pub const PROJECT_TAG_VALUE: &str = "LakeFormationAccessControl";

/// Value of the key-type tag on provisioned secrets.
pub const KEY_TYPE_TAG_VALUE: &str = "api-key";

/// Mapping-store key prefix of fingerprint index items.
pub const INDEX_PREFIX: &str = "apikey-sha256:";

pub const GENERATED_KEY_LENGTH: usize = 32;

pub fn secret_name(user_name: &str, environment: &str) -> String {
    format!("{}{}-apk-{}", SECRET_PREFIX, user_name, environment)
}

/// Whether a listed secret belongs to the given deployment environment.
pub fn belongs_to_environment(secret_name: &str, environment: &str) -> bool {
    secret_name.starts_with(SECRET_PREFIX) && secret_name.ends_with(&format!("-{}", environment))
}

pub fn default_table_name(environment: &str) -> String {
    format!("lf-apikey-mappings-apk-{}", environment)
}

/// Mapping-store key of the index item for a raw API key.
pub fn index_key(api_key: &str) -> String {
    format!("{}{}", INDEX_PREFIX, hex::encode(Sha256::digest(api_key.as_bytes())))
}

pub fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// JSON document stored as the secret value.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretPayload {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(default)]
    pub permissions: String,
}

impl std::fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretPayload")
            .field("api_key", &"[REDACTED]")
            .field("user_name", &self.user_name)
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Secret-store listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    pub name: String,
    pub arn: String,
}

/// Mapping-store item binding a secret (or index fingerprint) to a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyBinding {
    pub secret_id: String,
    pub role_arn: String,
    pub user_name: String,
    pub permissions: String,
}
