use secrecy::Secret;

use super::identity::AuthStrategy;

/// Caller-supplied proof of identity, one variant per verification strategy.
///
/// Secret parts are wrapped in [`Secret`] so they are redacted from `Debug`
/// output and zeroized when the credential is dropped at the end of the request.
#[derive(Debug)]
pub enum Credential {
    Password {
        username: String,
        password: Secret<String>,
    },
    Bearer {
        token: Secret<String>,
    },
    ApiKey {
        key: Secret<String>,
    },
}

impl Credential {
    pub fn strategy(&self) -> AuthStrategy {
        match self {
            Credential::Password { .. } => AuthStrategy::Password,
            Credential::Bearer { .. } => AuthStrategy::ClientCredentials,
            Credential::ApiKey { .. } => AuthStrategy::ApiKey,
        }
    }
}
