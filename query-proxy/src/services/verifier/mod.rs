pub mod api_key;
pub mod bearer;
pub mod password;

pub use api_key::ApiKeyVerifier;
pub use bearer::{parse_authorization, BearerVerifier};
pub use password::{secret_hash, PasswordVerifier};

use crate::models::{Credential, VerifiedIdentity};
use crate::services::error::ProxyError;

/// Dispatches a credential to the verifier for its strategy.
pub struct CredentialVerifier {
    password: PasswordVerifier,
    bearer: BearerVerifier,
    api_key: ApiKeyVerifier,
}

impl CredentialVerifier {
    pub fn new(password: PasswordVerifier, bearer: BearerVerifier, api_key: ApiKeyVerifier) -> Self {
        Self {
            password,
            bearer,
            api_key,
        }
    }

    #[tracing::instrument(skip_all, fields(strategy = %credential.strategy()))]
    pub async fn verify(&self, credential: &Credential) -> Result<VerifiedIdentity, ProxyError> {
        match credential {
            Credential::Password { username, password } => {
                self.password.verify(username, password).await
            }
            Credential::Bearer { token } => self.bearer.verify(token).await,
            Credential::ApiKey { key } => self.api_key.verify(key).await,
        }
    }
}
