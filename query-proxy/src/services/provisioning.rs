//! API-key provisioning: secret creation plus mapping-store binding and index
//! items, in the layout the API-key verifier reads.

use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use thiserror::Error;

use crate::clients::{AwsError, MappingStore, SecretStore};
use crate::models::api_key::{
    self, ApiKeyBinding, SecretPayload, KEY_TYPE_TAG, KEY_TYPE_TAG_VALUE, PROJECT_TAG_VALUE,
};

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("secret store: {0}")]
    SecretStore(#[source] AwsError),

    #[error("mapping store: {0}")]
    MappingStore(#[source] AwsError),

    #[error("cannot read the key held by existing secret '{secret}' ({reason}); rerun with force to overwrite it")]
    PreviousKeyUnreadable { secret: String, reason: String },

    #[error("failed to encode secret value: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ProvisionRequest {
    pub user_name: String,
    pub role_arn: String,
    pub permissions: String,
    /// Generated when absent.
    pub api_key: Option<Secret<String>>,
    pub environment: String,
    /// Overwrite an existing secret even when its current key cannot be
    /// read, leaving that key's index item behind.
    pub force: bool,
}

#[derive(Debug)]
pub struct ProvisionedKey {
    pub api_key: Secret<String>,
    pub secret_name: String,
    pub secret_arn: String,
    /// Whether an existing secret was overwritten rather than created.
    pub rotated: bool,
}

pub struct ApiKeyProvisioner {
    secrets: Arc<dyn SecretStore>,
    mappings: Arc<dyn MappingStore>,
}

impl ApiKeyProvisioner {
    pub fn new(secrets: Arc<dyn SecretStore>, mappings: Arc<dyn MappingStore>) -> Self {
        Self { secrets, mappings }
    }

    /// Create (or overwrite) the user's key secret, then write the binding
    /// item keyed by the secret ARN and the fingerprint index item.
    ///
    /// Overwriting a secret whose key changed removes the previous index item
    /// so the old key stops resolving. If the previous key cannot be read the
    /// secret is left untouched unless `force` is set.
    #[tracing::instrument(skip_all, fields(user = %request.user_name, environment = %request.environment))]
    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionedKey, ProvisionError> {
        validate(&request)?;

        let api_key = request
            .api_key
            .unwrap_or_else(|| Secret::new(api_key::generate_api_key()));
        let secret_name = api_key::secret_name(&request.user_name, &request.environment);
        let payload = serde_json::to_string(&SecretPayload {
            api_key: api_key.expose_secret().clone(),
            user_name: request.user_name.clone(),
            permissions: request.permissions.clone(),
        })?;
        let tags = vec![
            ("Environment".to_string(), request.environment.clone()),
            ("Project".to_string(), PROJECT_TAG_VALUE.to_string()),
            ("UserRole".to_string(), request.user_name.clone()),
            (KEY_TYPE_TAG.to_string(), KEY_TYPE_TAG_VALUE.to_string()),
        ];
        let description = format!("API key for {}", request.user_name);

        let (secret_arn, rotated) = match self
            .secrets
            .create_secret(&secret_name, &description, &payload, &tags)
            .await
        {
            Ok(arn) => {
                tracing::info!(secret = %secret_name, "Created API key secret");
                (arn, false)
            }
            Err(e) if e.code() == Some("ResourceExistsException") => {
                let previous = match self.previous_key(&secret_name).await {
                    Ok(previous) => Some(previous),
                    Err(reason) if request.force => {
                        tracing::warn!(secret = %secret_name, reason = %reason, "Overwriting secret with unreadable key");
                        None
                    }
                    Err(reason) => {
                        return Err(ProvisionError::PreviousKeyUnreadable {
                            secret: secret_name,
                            reason,
                        });
                    }
                };
                let arn = self
                    .secrets
                    .put_secret_value(&secret_name, &payload)
                    .await
                    .map_err(ProvisionError::SecretStore)?;
                tracing::info!(secret = %secret_name, "Updated existing API key secret");

                if let Some(previous) = previous {
                    if previous.expose_secret() != api_key.expose_secret() {
                        self.mappings
                            .delete_binding(&api_key::index_key(previous.expose_secret()))
                            .await
                            .map_err(ProvisionError::MappingStore)?;
                        tracing::info!(secret = %secret_name, "Removed index item of replaced key");
                    }
                }
                (arn, true)
            }
            Err(e) => return Err(ProvisionError::SecretStore(e)),
        };

        for secret_id in [secret_arn.clone(), api_key::index_key(api_key.expose_secret())] {
            self.mappings
                .put_binding(&ApiKeyBinding {
                    secret_id,
                    role_arn: request.role_arn.clone(),
                    user_name: request.user_name.clone(),
                    permissions: request.permissions.clone(),
                })
                .await
                .map_err(ProvisionError::MappingStore)?;
        }
        tracing::info!(role = %request.role_arn, "Stored role binding and key index");

        Ok(ProvisionedKey {
            api_key,
            secret_name,
            secret_arn,
            rotated,
        })
    }

    /// Key held by an existing secret, or why it could not be read.
    async fn previous_key(&self, secret_name: &str) -> Result<Secret<String>, String> {
        let value = self
            .secrets
            .get_secret_value(secret_name)
            .await
            .map_err(|e| e.reason())?;
        serde_json::from_str::<SecretPayload>(&value)
            .map(|payload| Secret::new(payload.api_key))
            .map_err(|e| format!("not an API key payload: {}", e))
    }
}

fn validate(request: &ProvisionRequest) -> Result<(), ProvisionError> {
    if request.user_name.trim().is_empty() {
        return Err(ProvisionError::InvalidInput("user name is empty".to_string()));
    }
    // The name is embedded in the secret name and the session name.
    if !request
        .user_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(ProvisionError::InvalidInput(format!(
            "user name '{}' may only contain letters, digits, '-', '_', '.', '@'",
            request.user_name
        )));
    }
    if !request.role_arn.starts_with("arn:") {
        return Err(ProvisionError::InvalidInput(format!(
            "'{}' is not a role ARN",
            request.role_arn
        )));
    }
    if request.environment.trim().is_empty() {
        return Err(ProvisionError::InvalidInput("environment is empty".to_string()));
    }
    if let Some(key) = &request.api_key {
        if key.expose_secret().trim().is_empty() {
            return Err(ProvisionError::InvalidInput("API key is empty".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::dynamodb::MockMappingStore;
    use crate::clients::secrets_manager::MockSecretStore;

    const ROLE: &str = "arn:aws:iam::123456789012:role/lf-dev";

    fn request(api_key: Option<&str>) -> ProvisionRequest {
        ProvisionRequest {
            user_name: "alice".to_string(),
            role_arn: ROLE.to_string(),
            permissions: "read-only".to_string(),
            api_key: api_key.map(|k| Secret::new(k.to_string())),
            environment: "dev".to_string(),
            force: false,
        }
    }

    fn stores() -> (Arc<MockSecretStore>, Arc<MockMappingStore>) {
        (Arc::new(MockSecretStore::new()), Arc::new(MockMappingStore::new()))
    }

    #[tokio::test]
    async fn test_provision_creates_secret_binding_and_index() {
        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets.clone(), mappings.clone());

        let key = provisioner.provision(request(Some("k-123"))).await.unwrap();

        assert_eq!(key.secret_name, "lf-apikey-alice-apk-dev");
        assert_eq!(key.secret_arn, MockSecretStore::arn_for("lf-apikey-alice-apk-dev"));
        assert!(!key.rotated);

        let payload: SecretPayload =
            serde_json::from_str(&secrets.value_of(&key.secret_name).unwrap()).unwrap();
        assert_eq!(payload.api_key, "k-123");
        assert_eq!(payload.user_name, "alice");
        assert_eq!(payload.permissions, "read-only");

        let tags = secrets.tags_of(&key.secret_name).unwrap();
        assert_eq!(tags["Environment"], "dev");
        assert_eq!(tags["Project"], PROJECT_TAG_VALUE);
        assert_eq!(tags["UserRole"], "alice");
        assert_eq!(tags[KEY_TYPE_TAG], KEY_TYPE_TAG_VALUE);

        let binding = mappings.get_binding(&key.secret_arn).await.unwrap().unwrap();
        assert_eq!(binding.role_arn, ROLE);
        let index = mappings
            .get_binding(&api_key::index_key("k-123"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index.user_name, "alice");
        assert_eq!(index.role_arn, ROLE);
    }

    #[tokio::test]
    async fn test_provision_generates_key_when_absent() {
        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets, mappings.clone());

        let key = provisioner.provision(request(None)).await.unwrap();
        let generated = key.api_key.expose_secret();

        assert_eq!(generated.len(), api_key::GENERATED_KEY_LENGTH);
        assert!(mappings
            .get_binding(&api_key::index_key(generated))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reprovision_rotates_key_and_drops_old_index() {
        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets.clone(), mappings.clone());

        provisioner.provision(request(Some("old-key"))).await.unwrap();
        let key = provisioner.provision(request(Some("new-key"))).await.unwrap();

        assert!(key.rotated);
        let payload: SecretPayload =
            serde_json::from_str(&secrets.value_of(&key.secret_name).unwrap()).unwrap();
        assert_eq!(payload.api_key, "new-key");
        assert!(mappings
            .get_binding(&api_key::index_key("old-key"))
            .await
            .unwrap()
            .is_none());
        assert!(mappings
            .get_binding(&api_key::index_key("new-key"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reprovision_same_key_keeps_index() {
        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets, mappings.clone());

        provisioner.provision(request(Some("same"))).await.unwrap();
        provisioner.provision(request(Some("same"))).await.unwrap();

        assert!(mappings
            .get_binding(&api_key::index_key("same"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unreadable_previous_key_blocks_rotation() {
        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets.clone(), mappings.clone());
        let first = provisioner.provision(request(Some("old-key"))).await.unwrap();
        secrets
            .failing_reads
            .lock()
            .unwrap()
            .push(first.secret_name.clone());

        let err = provisioner
            .provision(request(Some("new-key")))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::PreviousKeyUnreadable { .. }));
        let payload: SecretPayload =
            serde_json::from_str(&secrets.value_of(&first.secret_name).unwrap()).unwrap();
        assert_eq!(payload.api_key, "old-key");
        assert!(mappings
            .get_binding(&api_key::index_key("old-key"))
            .await
            .unwrap()
            .is_some());
        assert!(mappings
            .get_binding(&api_key::index_key("new-key"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_forced_rotation_overwrites_unreadable_secret() {
        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets.clone(), mappings.clone());
        let first = provisioner.provision(request(Some("old-key"))).await.unwrap();
        secrets
            .failing_reads
            .lock()
            .unwrap()
            .push(first.secret_name.clone());

        let mut forced = request(Some("new-key"));
        forced.force = true;
        let key = provisioner.provision(forced).await.unwrap();

        assert!(key.rotated);
        let payload: SecretPayload =
            serde_json::from_str(&secrets.value_of(&key.secret_name).unwrap()).unwrap();
        assert_eq!(payload.api_key, "new-key");
        assert!(mappings
            .get_binding(&api_key::index_key("new-key"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_invalid_input_writes_nothing() {
        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets.clone(), mappings);

        let mut bad_user = request(Some("k"));
        bad_user.user_name = "alice smith".to_string();
        assert!(matches!(
            provisioner.provision(bad_user).await,
            Err(ProvisionError::InvalidInput(_))
        ));

        let mut bad_role = request(Some("k"));
        bad_role.role_arn = "lf-dev".to_string();
        assert!(matches!(
            provisioner.provision(bad_role).await,
            Err(ProvisionError::InvalidInput(_))
        ));

        assert!(secrets.value_of("lf-apikey-alice smith-apk-dev").is_none());
        assert!(secrets.value_of("lf-apikey-alice-apk-dev").is_none());
    }

    #[tokio::test]
    async fn test_provisioned_key_is_found_by_verifier() {
        use crate::models::RoleId;
        use crate::services::verifier::ApiKeyVerifier;

        let (secrets, mappings) = stores();
        let provisioner = ApiKeyProvisioner::new(secrets.clone(), mappings.clone());
        let key = provisioner.provision(request(Some("shared-key"))).await.unwrap();

        for scan_fallback in [false, true] {
            let verifier = ApiKeyVerifier::new(secrets.clone(), mappings.clone(), "dev", scan_fallback);
            let identity = verifier.verify(&key.api_key).await.unwrap();
            assert_eq!(identity.principal, "alice");
            assert_eq!(identity.bound_role, Some(RoleId::new(ROLE)));
        }
    }
}
