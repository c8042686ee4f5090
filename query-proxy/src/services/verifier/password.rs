use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::Arc;

use crate::clients::cognito::CHALLENGE_REQUIRED;
use crate::clients::{AwsError, IdentityProvider};
use crate::models::{AuthStrategy, VerifiedIdentity};
use crate::services::error::ProxyError;
use crate::services::identity_cache::IdentityCache;

type HmacSha256 = Hmac<Sha256>;

/// Provider error codes that mean the username/password pair was rejected.
const REJECTION_CODES: &[&str] = &[
    "NotAuthorizedException",
    "UserNotFoundException",
    "UserNotConfirmedException",
    "PasswordResetRequiredException",
    CHALLENGE_REQUIRED,
];

/// `base64(HMAC-SHA256(client_secret, username || client_id))`.
pub fn secret_hash(
    username: &str,
    client_id: &str,
    client_secret: &Secret<String>,
) -> Result<String, ProxyError> {
    let mut mac = HmacSha256::new_from_slice(client_secret.expose_secret().as_bytes())
        .map_err(|e| ProxyError::ProviderUnavailable(format!("invalid client secret: {}", e)))?;
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub struct PasswordVerifier {
    provider: Arc<dyn IdentityProvider>,
    client_id: String,
    client_secret: Secret<String>,
    cache: Option<IdentityCache>,
    group_lookup_required: bool,
}

impl PasswordVerifier {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
    ) -> Self {
        Self {
            provider,
            client_id: client_id.into(),
            client_secret,
            cache: None,
            group_lookup_required: false,
        }
    }

    pub fn with_cache(mut self, cache: IdentityCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fail verification when group membership cannot be read instead of
    /// continuing with no groups.
    pub fn require_group_lookup(mut self, required: bool) -> Self {
        self.group_lookup_required = required;
        self
    }

    pub async fn verify(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> Result<VerifiedIdentity, ProxyError> {
        let fingerprint =
            IdentityCache::fingerprint(&[&self.client_id, username, password.expose_secret()]);
        if let Some(identity) = self.cache.as_ref().and_then(|c| c.get(&fingerprint)) {
            tracing::debug!(username = %username, "Password verification served from cache");
            return Ok(identity);
        }

        let hash = secret_hash(username, &self.client_id, &self.client_secret)?;
        let tokens = self
            .provider
            .initiate_password_auth(username, password, &hash)
            .await
            .map_err(|e| classify_auth_error(username, e))?;

        let profile = self
            .provider
            .get_user(&tokens.access_token)
            .await
            .map_err(|e| ProxyError::ProfileLookup(e.to_string()))?;

        let (groups, degraded) = match self.provider.list_groups(&profile.username).await {
            Ok(groups) => (groups, false),
            Err(e) if self.group_lookup_required => {
                return Err(ProxyError::ProfileLookup(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(
                    username = %profile.username,
                    error = %e,
                    "Group lookup failed; continuing with no groups"
                );
                (Vec::new(), true)
            }
        };

        let mut identity =
            VerifiedIdentity::new(AuthStrategy::Password, profile.username).with_groups(groups);
        identity.attributes = profile.attributes;
        identity.token_use = Some("access".to_string());

        // A degraded lookup is not cached so the next request retries it.
        if let (Some(cache), false) = (&self.cache, degraded) {
            cache.insert(
                fingerprint,
                identity.clone(),
                Utc::now() + Duration::seconds(tokens.expires_in.max(0)),
            );
        }

        tracing::info!(
            username = %identity.principal,
            groups = ?identity.groups,
            "Password credentials verified"
        );
        Ok(identity)
    }
}

fn classify_auth_error(username: &str, err: AwsError) -> ProxyError {
    match err.code() {
        Some(code) if REJECTION_CODES.contains(&code) => {
            tracing::info!(username = %username, code = %code, "Password authentication rejected");
            ProxyError::InvalidCredentials
        }
        _ => {
            tracing::error!(username = %username, error = %err, "Identity provider call failed");
            ProxyError::ProviderUnavailable(err.reason())
        }
    }
}
