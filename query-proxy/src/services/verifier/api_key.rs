use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::clients::{MappingStore, SecretStore};
use crate::models::api_key::{self, ApiKeyBinding, SecretEntry, SecretPayload};
use crate::models::{AuthStrategy, RoleId, VerifiedIdentity};
use crate::services::error::ProxyError;

/// Resolves an opaque API key to its binding.
///
/// The fingerprint index item is consulted first. Without one, and when the
/// fallback is enabled, the environment's API-key secrets are scanned in
/// listing order and the first secret whose embedded key matches wins.
pub struct ApiKeyVerifier {
    secrets: Arc<dyn SecretStore>,
    mappings: Arc<dyn MappingStore>,
    environment: String,
    scan_fallback: bool,
}

impl ApiKeyVerifier {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        mappings: Arc<dyn MappingStore>,
        environment: impl Into<String>,
        scan_fallback: bool,
    ) -> Self {
        Self {
            secrets,
            mappings,
            environment: environment.into(),
            scan_fallback,
        }
    }

    pub async fn verify(&self, key: &Secret<String>) -> Result<VerifiedIdentity, ProxyError> {
        let key = key.expose_secret();
        if key.is_empty() {
            return Err(ProxyError::MissingApiKey);
        }

        let binding = match self.lookup_index(key).await? {
            Some(binding) => binding,
            None if self.scan_fallback => self.scan(key).await?,
            None => return Err(ProxyError::InvalidApiKey),
        };

        tracing::info!(
            user = %binding.user_name,
            permissions = %binding.permissions,
            "API key verified"
        );

        Ok(
            VerifiedIdentity::new(AuthStrategy::ApiKey, binding.user_name)
                .with_attribute("permissions", binding.permissions)
                .with_bound_role(RoleId::new(binding.role_arn)),
        )
    }

    async fn lookup_index(&self, key: &str) -> Result<Option<ApiKeyBinding>, ProxyError> {
        self.mappings
            .get_binding(&api_key::index_key(key))
            .await
            .map_err(|e| ProxyError::MappingStore(e.to_string()))
    }

    async fn scan(&self, key: &str) -> Result<ApiKeyBinding, ProxyError> {
        let (entry, payload) = self
            .find_secret(key)
            .await?
            .ok_or(ProxyError::InvalidApiKey)?;
        tracing::debug!(secret = %entry.name, "API key matched by secret scan");

        let binding = self
            .mappings
            .get_binding(&entry.arn)
            .await
            .map_err(|e| ProxyError::MappingStore(e.to_string()))?
            .ok_or_else(|| {
                tracing::warn!(secret = %entry.name, "API key secret has no role mapping");
                ProxyError::MissingRoleMapping
            })?;

        Ok(ApiKeyBinding {
            user_name: if binding.user_name.is_empty() {
                payload.user_name
            } else {
                binding.user_name
            },
            ..binding
        })
    }

    async fn find_secret(&self, key: &str) -> Result<Option<(SecretEntry, SecretPayload)>, ProxyError> {
        let candidates = self
            .secrets
            .list_secrets(api_key::SECRET_PREFIX, api_key::KEY_TYPE_TAG)
            .await
            .map_err(|e| ProxyError::SecretStore(e.to_string()))?;

        for entry in candidates
            .into_iter()
            .filter(|e| api_key::belongs_to_environment(&e.name, &self.environment))
        {
            let value = match self.secrets.get_secret_value(&entry.name).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(secret = %entry.name, error = %e, "Skipping unreadable API key secret");
                    continue;
                }
            };

            let payload: SecretPayload = match serde_json::from_str(&value) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(secret = %entry.name, error = %e, "Skipping malformed API key secret");
                    continue;
                }
            };

            if keys_match(&payload.api_key, key) {
                return Ok(Some((entry, payload)));
            }
        }

        Ok(None)
    }
}

/// Exact equality without early exit on the first differing byte.
fn keys_match(stored: &str, presented: &str) -> bool {
    stored.len() == presented.len() && bool::from(stored.as_bytes().ct_eq(presented.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::dynamodb::MockMappingStore;
    use crate::clients::secrets_manager::MockSecretStore;

    const DEV_ROLE: &str = "arn:aws:iam::123456789012:role/lf-dev";
    const SUPER_ROLE: &str = "arn:aws:iam::123456789012:role/lf-super";

    fn payload(key: &str, user: &str) -> String {
        serde_json::json!({ "apiKey": key, "userName": user, "permissions": "read-only" }).to_string()
    }

    fn binding(secret_id: &str, role: &str, user: &str) -> ApiKeyBinding {
        ApiKeyBinding {
            secret_id: secret_id.to_string(),
            role_arn: role.to_string(),
            user_name: user.to_string(),
            permissions: "read-only".to_string(),
        }
    }

    fn secret(key: &str) -> Secret<String> {
        Secret::new(key.to_string())
    }

    fn scanning(secrets: MockSecretStore, mappings: MockMappingStore) -> ApiKeyVerifier {
        ApiKeyVerifier::new(Arc::new(secrets), Arc::new(mappings), "dev", true)
    }

    #[tokio::test]
    async fn test_index_lookup_resolves_bound_role() {
        let mappings = MockMappingStore::new().with_binding(binding(
            &api_key::index_key("key-alice"),
            SUPER_ROLE,
            "alice",
        ));
        let verifier = ApiKeyVerifier::new(
            Arc::new(MockSecretStore::new()),
            Arc::new(mappings),
            "dev",
            false,
        );

        let identity = verifier.verify(&secret("key-alice")).await.unwrap();
        assert_eq!(identity.strategy, AuthStrategy::ApiKey);
        assert_eq!(identity.principal, "alice");
        assert_eq!(identity.bound_role, Some(RoleId::new(SUPER_ROLE)));
    }

    #[tokio::test]
    async fn test_scan_finds_key_and_resolves_binding_by_arn() {
        let name = api_key::secret_name("bob", "dev");
        let secrets = MockSecretStore::new()
            .with_secret(&api_key::secret_name("alice", "dev"), &payload("key-alice", "alice"), api_key::KEY_TYPE_TAG)
            .with_secret(&name, &payload("key-bob", "bob"), api_key::KEY_TYPE_TAG);
        let mappings =
            MockMappingStore::new().with_binding(binding(&MockSecretStore::arn_for(&name), DEV_ROLE, "bob"));

        let identity = scanning(secrets, mappings)
            .verify(&secret("key-bob"))
            .await
            .unwrap();
        assert_eq!(identity.principal, "bob");
        assert_eq!(identity.bound_role, Some(RoleId::new(DEV_ROLE)));
        assert_eq!(identity.attributes.get("permissions").map(String::as_str), Some("read-only"));
    }

    #[tokio::test]
    async fn test_scan_stops_at_first_match_in_listing_order() {
        let first = api_key::secret_name("first", "dev");
        let second = api_key::secret_name("second", "dev");
        let secrets = MockSecretStore::new()
            .with_secret(&first, &payload("shared", "first"), api_key::KEY_TYPE_TAG)
            .with_secret(&second, &payload("shared", "second"), api_key::KEY_TYPE_TAG);
        let mappings = MockMappingStore::new()
            .with_binding(binding(&MockSecretStore::arn_for(&first), DEV_ROLE, "first"))
            .with_binding(binding(&MockSecretStore::arn_for(&second), SUPER_ROLE, "second"));

        let identity = scanning(secrets, mappings)
            .verify(&secret("shared"))
            .await
            .unwrap();
        assert_eq!(identity.principal, "first");
    }

    #[tokio::test]
    async fn test_scan_ignores_other_environments_and_untagged_secrets() {
        let secrets = MockSecretStore::new()
            .with_secret(&api_key::secret_name("p", "prod"), &payload("k", "p"), api_key::KEY_TYPE_TAG)
            .with_secret(&api_key::secret_name("u", "dev"), &payload("k", "u"), "SomeOtherTag");

        let err = scanning(secrets, MockMappingStore::new())
            .verify(&secret("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_unreadable_and_malformed_secrets_are_skipped() {
        let broken = api_key::secret_name("broken", "dev");
        let garbage = api_key::secret_name("garbage", "dev");
        let good = api_key::secret_name("good", "dev");
        let secrets = MockSecretStore::new()
            .with_secret(&broken, &payload("k", "broken"), api_key::KEY_TYPE_TAG)
            .with_secret(&garbage, "not json", api_key::KEY_TYPE_TAG)
            .with_secret(&good, &payload("k", "good"), api_key::KEY_TYPE_TAG);
        secrets.failing_reads.lock().unwrap().push(broken.clone());
        let mappings =
            MockMappingStore::new().with_binding(binding(&MockSecretStore::arn_for(&good), DEV_ROLE, "good"));

        let identity = scanning(secrets, mappings).verify(&secret("k")).await.unwrap();
        assert_eq!(identity.principal, "good");
    }

    #[tokio::test]
    async fn test_unknown_key_is_invalid() {
        for attempt in ["key-alic", "key-alice ", "KEY-ALICE", "other"] {
            let secrets = MockSecretStore::new().with_secret(
                &api_key::secret_name("alice", "dev"),
                &payload("key-alice", "alice"),
                api_key::KEY_TYPE_TAG,
            );
            let err = scanning(secrets, MockMappingStore::new())
                .verify(&secret(attempt))
                .await
                .unwrap_err();
            assert!(matches!(err, ProxyError::InvalidApiKey), "{attempt}");
        }
    }

    #[tokio::test]
    async fn test_matched_key_without_mapping_is_forbidden() {
        let secrets = MockSecretStore::new().with_secret(
            &api_key::secret_name("alice", "dev"),
            &payload("key-alice", "alice"),
            api_key::KEY_TYPE_TAG,
        );

        let err = scanning(secrets, MockMappingStore::new())
            .verify(&secret("key-alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::MissingRoleMapping));
    }

    #[tokio::test]
    async fn test_without_fallback_index_miss_is_invalid() {
        let secrets = MockSecretStore::new().with_secret(
            &api_key::secret_name("alice", "dev"),
            &payload("key-alice", "alice"),
            api_key::KEY_TYPE_TAG,
        );
        let verifier = ApiKeyVerifier::new(
            Arc::new(secrets),
            Arc::new(MockMappingStore::new()),
            "dev",
            false,
        );

        let err = verifier.verify(&secret("key-alice")).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidApiKey));
    }

    #[tokio::test]
    async fn test_listing_failure_is_downstream() {
        let mut secrets = MockSecretStore::new();
        secrets.unavailable = true;

        let err = scanning(secrets, MockMappingStore::new())
            .verify(&secret("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::SecretStore(_)));
    }

    #[test]
    fn test_keys_match_is_exact() {
        assert!(keys_match("abc", "abc"));
        assert!(!keys_match("abc", "abd"));
        assert!(!keys_match("abc", "abcd"));
        assert!(!keys_match("", "a"));
    }
}
