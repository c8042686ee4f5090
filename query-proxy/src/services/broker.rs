use chrono::Utc;
use std::sync::Arc;

use crate::clients::RoleAssumer;
use crate::models::{AuthStrategy, RoleId, ScopedCredential};
use crate::services::error::ProxyError;

/// Validity window requested for every scoped credential.
pub const SESSION_DURATION_SECS: u32 = 3600;

/// Longest session name the assumption service accepts from this proxy.
pub const MAX_SESSION_NAME_LEN: usize = 32;

/// `<prefix>-<hint>` restricted to the session-name alphabet and truncated.
pub fn session_name(prefix: &str, hint: &str) -> String {
    format!("{}-{}", prefix, hint)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "+=,.@_-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}

pub struct CredentialBroker {
    assumer: Arc<dyn RoleAssumer>,
}

impl CredentialBroker {
    pub fn new(assumer: Arc<dyn RoleAssumer>) -> Self {
        Self { assumer }
    }

    /// Single attempt; a failure is returned to the caller as-is. A credential
    /// that has already lapsed on arrival counts as a failure.
    pub async fn assume_role(
        &self,
        role: &RoleId,
        strategy: AuthStrategy,
        session_hint: &str,
    ) -> Result<ScopedCredential, ProxyError> {
        let session = session_name(strategy.session_prefix(), session_hint);

        let credential = self
            .assumer
            .assume_role(role, &session, SESSION_DURATION_SECS)
            .await
            .map_err(|e| {
                tracing::error!(role = %role, session = %session, error = %e, "Role assumption failed");
                ProxyError::Broker(e.reason())
            })?;

        if credential.is_expired_at(Utc::now()) {
            tracing::error!(role = %role, session = %session, expires_at = %credential.expires_at, "Assumed role credential already expired");
            return Err(ProxyError::Broker(format!(
                "credential for {} expired at {}",
                role, credential.expires_at
            )));
        }

        tracing::info!(
            role = %role,
            session = %session,
            expires_at = %credential.expires_at,
            "Assumed role"
        );
        Ok(credential)
    }
}
