use service_core::error::AppError;
use thiserror::Error;

use super::orchestrator::QueryFailure;

/// Pipeline failure taxonomy. `Display` is the caller-facing message.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Missing authentication credentials (username/password)")]
    MissingPasswordCredentials,

    #[error("{0}")]
    MalformedInput(String),

    #[error("Authentication failed - invalid credentials")]
    InvalidCredentials,

    #[error("Missing or invalid Authorization header. Expected: Bearer <token>")]
    MissingBearer,

    #[error("Missing access token")]
    MissingAccessToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid token type. Expected access token")]
    WrongTokenUse,

    #[error("Missing required x-api-key header")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("No role mapping configured for API key")]
    MissingRoleMapping,

    #[error("Client '{0}' not authorized")]
    ClientNotAuthorized(String),

    #[error("Authentication service unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Failed to retrieve user information")]
    ProfileLookup(String),

    #[error("Token signing keys unavailable")]
    KeysUnavailable(String),

    #[error("API key lookup failed")]
    SecretStore(String),

    #[error("Role mapping lookup failed")]
    MappingStore(String),

    #[error("Failed to assume role: {0}")]
    Broker(String),

    #[error(transparent)]
    Query(#[from] QueryFailure),
}

impl ProxyError {
    /// Low-cardinality label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            ProxyError::MissingParameter(_)
            | ProxyError::MissingPasswordCredentials
            | ProxyError::MalformedInput(_) => "malformed_input",
            ProxyError::InvalidCredentials
            | ProxyError::MissingBearer
            | ProxyError::MissingAccessToken
            | ProxyError::InvalidToken
            | ProxyError::WrongTokenUse
            | ProxyError::MissingApiKey => "authentication_failed",
            ProxyError::InvalidApiKey
            | ProxyError::MissingRoleMapping
            | ProxyError::ClientNotAuthorized(_) => "unauthorized",
            ProxyError::Query(QueryFailure::Timeout { .. }) => "timeout",
            ProxyError::ProviderUnavailable(_)
            | ProxyError::ProfileLookup(_)
            | ProxyError::KeysUnavailable(_)
            | ProxyError::SecretStore(_)
            | ProxyError::MappingStore(_)
            | ProxyError::Broker(_)
            | ProxyError::Query(_) => "downstream_failure",
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        let message = err.to_string();
        match err {
            ProxyError::MissingParameter(_)
            | ProxyError::MissingPasswordCredentials
            | ProxyError::MalformedInput(_) => AppError::MalformedInput(message),

            ProxyError::InvalidCredentials
            | ProxyError::MissingBearer
            | ProxyError::MissingAccessToken
            | ProxyError::InvalidToken
            | ProxyError::WrongTokenUse
            | ProxyError::MissingApiKey => AppError::AuthenticationFailed(message),

            ProxyError::InvalidApiKey
            | ProxyError::MissingRoleMapping
            | ProxyError::ClientNotAuthorized(_) => AppError::Unauthorized(message),

            ProxyError::Query(QueryFailure::Timeout { .. }) => AppError::Timeout(message),

            ProxyError::ProfileLookup(detail)
            | ProxyError::KeysUnavailable(detail)
            | ProxyError::SecretStore(detail)
            | ProxyError::MappingStore(detail) => {
                tracing::error!(error = %detail, "{}", message);
                AppError::DownstreamFailure(message)
            }

            ProxyError::ProviderUnavailable(_) | ProxyError::Broker(_) | ProxyError::Query(_) => {
                AppError::DownstreamFailure(message)
            }
        }
    }
}
