//! Shared AWS SDK configuration and error mapping.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl AwsError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        AwsError::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Provider-supplied reason, safe to return to callers.
    pub fn reason(&self) -> String {
        match self {
            AwsError::Service { code, message } if message.is_empty() => code.clone(),
            AwsError::Service { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl<E, R> From<SdkError<E, R>> for AwsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(err: SdkError<E, R>) -> Self {
        match err {
            SdkError::ServiceError(service) => {
                let err = service.into_err();
                AwsError::service(
                    err.code().unwrap_or("Unknown"),
                    err.message().unwrap_or_default(),
                )
            }
            other => AwsError::Transport(DisplayErrorContext(&other).to_string()),
        }
    }
}

/// Shared SDK configuration: the default credential provider chain (env,
/// profile, SSO, web identity, ECS, IMDS) plus region and optional endpoint
/// override for local stacks.
pub async fn load_sdk_config(region: &str, endpoint_url: Option<&str>) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
    if let Some(url) = endpoint_url {
        loader = loader.endpoint_url(url);
    }
    loader.load().await
}

/// Drops empty continuation tokens some endpoints return on the last page.
pub(crate) fn next_token(token: Option<&str>) -> Option<String> {
    token.filter(|t| !t.is_empty()).map(str::to_string)
}
