use async_trait::async_trait;
use aws_sdk_secretsmanager::types::{Filter, FilterNameStringType, Tag};
use std::collections::HashMap;
use std::sync::Mutex;

use super::sdk::{self, AwsError};
use crate::models::SecretEntry;

const LIST_PAGE_SIZE: i32 = 100;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Secrets whose name starts with `name_prefix` and that carry `tag_key`,
    /// in provider listing order.
    async fn list_secrets(&self, name_prefix: &str, tag_key: &str)
        -> Result<Vec<SecretEntry>, AwsError>;

    async fn get_secret_value(&self, secret_id: &str) -> Result<String, AwsError>;

    /// Returns the ARN of the new secret.
    async fn create_secret(
        &self,
        name: &str,
        description: &str,
        value: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError>;

    async fn put_secret_value(&self, secret_id: &str, value: &str) -> Result<String, AwsError>;
}

pub struct SecretsManagerClient {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerClient {
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

fn filter(key: FilterNameStringType, value: &str) -> Filter {
    Filter::builder().key(key).values(value).build()
}

#[async_trait]
impl SecretStore for SecretsManagerClient {
    async fn list_secrets(
        &self,
        name_prefix: &str,
        tag_key: &str,
    ) -> Result<Vec<SecretEntry>, AwsError> {
        let mut entries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_secrets()
                .filters(filter(FilterNameStringType::Name, name_prefix))
                .filters(filter(FilterNameStringType::TagKey, tag_key))
                .max_results(LIST_PAGE_SIZE)
                .set_next_token(next_token.take())
                .send()
                .await?;

            entries.extend(response.secret_list().iter().filter_map(|s| {
                Some(SecretEntry {
                    name: s.name()?.to_string(),
                    arn: s.arn()?.to_string(),
                })
            }));

            match sdk::next_token(response.next_token()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(entries)
    }

    async fn get_secret_value(&self, secret_id: &str) -> Result<String, AwsError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await?;
        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| AwsError::Decode(format!("secret {} has no string value", secret_id)))
    }

    async fn create_secret(
        &self,
        name: &str,
        description: &str,
        value: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        let tags = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect();

        let response = self
            .client
            .create_secret()
            .name(name)
            .description(description)
            .secret_string(value)
            .set_tags(Some(tags))
            .client_request_token(uuid::Uuid::new_v4().to_string())
            .send()
            .await?;
        arn_of(response.arn(), name)
    }

    async fn put_secret_value(&self, secret_id: &str, value: &str) -> Result<String, AwsError> {
        let response = self
            .client
            .put_secret_value()
            .secret_id(secret_id)
            .secret_string(value)
            .client_request_token(uuid::Uuid::new_v4().to_string())
            .send()
            .await?;
        arn_of(response.arn(), secret_id)
    }
}

fn arn_of(arn: Option<&str>, secret_id: &str) -> Result<String, AwsError> {
    arn.map(str::to_string)
        .ok_or_else(|| AwsError::Decode(format!("no ARN returned for secret {}", secret_id)))
}

/// In-memory secret store preserving insertion order as listing order.
#[derive(Default)]
pub struct MockSecretStore {
    secrets: Mutex<Vec<MockSecret>>,
    pub failing_reads: Mutex<Vec<String>>,
    pub unavailable: bool,
}

struct MockSecret {
    entry: SecretEntry,
    value: String,
    tags: HashMap<String, String>,
}

impl MockSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret tagged with `tag_key`; the ARN is derived from the name.
    pub fn with_secret(self, name: &str, value: &str, tag_key: &str) -> Self {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.push(MockSecret {
                entry: SecretEntry {
                    name: name.to_string(),
                    arn: Self::arn_for(name),
                },
                value: value.to_string(),
                tags: HashMap::from([(tag_key.to_string(), "true".to_string())]),
            });
        }
        self
    }

    pub fn arn_for(name: &str) -> String {
        format!(
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:{}-AbCdEf",
            name
        )
    }

    pub fn value_of(&self, name: &str) -> Option<String> {
        self.secrets.lock().ok().and_then(|secrets| {
            secrets
                .iter()
                .find(|s| s.entry.name == name)
                .map(|s| s.value.clone())
        })
    }

    pub fn tags_of(&self, name: &str) -> Option<HashMap<String, String>> {
        self.secrets.lock().ok().and_then(|secrets| {
            secrets
                .iter()
                .find(|s| s.entry.name == name)
                .map(|s| s.tags.clone())
        })
    }

    fn poisoned() -> AwsError {
        AwsError::Transport("mock poisoned".to_string())
    }

    fn not_found() -> AwsError {
        AwsError::service(
            "ResourceNotFoundException",
            "Secrets Manager can't find the specified secret.",
        )
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    async fn list_secrets(
        &self,
        name_prefix: &str,
        tag_key: &str,
    ) -> Result<Vec<SecretEntry>, AwsError> {
        if self.unavailable {
            return Err(AwsError::Transport("connection refused".to_string()));
        }
        let secrets = self.secrets.lock().map_err(|_| Self::poisoned())?;
        Ok(secrets
            .iter()
            .filter(|s| s.entry.name.starts_with(name_prefix) && s.tags.contains_key(tag_key))
            .map(|s| s.entry.clone())
            .collect())
    }

    async fn get_secret_value(&self, secret_id: &str) -> Result<String, AwsError> {
        let failing = self.failing_reads.lock().map_err(|_| Self::poisoned())?;
        if failing.iter().any(|name| name == secret_id) {
            return Err(AwsError::service(
                "AccessDeniedException",
                format!("Access denied to {}", secret_id),
            ));
        }

        let secrets = self.secrets.lock().map_err(|_| Self::poisoned())?;
        secrets
            .iter()
            .find(|s| s.entry.name == secret_id || s.entry.arn == secret_id)
            .map(|s| s.value.clone())
            .ok_or_else(Self::not_found)
    }

    async fn create_secret(
        &self,
        name: &str,
        _description: &str,
        value: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        let mut secrets = self.secrets.lock().map_err(|_| Self::poisoned())?;
        if secrets.iter().any(|s| s.entry.name == name) {
            return Err(AwsError::service(
                "ResourceExistsException",
                format!("The operation failed because the secret {} already exists.", name),
            ));
        }

        let arn = Self::arn_for(name);
        secrets.push(MockSecret {
            entry: SecretEntry {
                name: name.to_string(),
                arn: arn.clone(),
            },
            value: value.to_string(),
            tags: tags.iter().cloned().collect(),
        });
        Ok(arn)
    }

    async fn put_secret_value(&self, secret_id: &str, value: &str) -> Result<String, AwsError> {
        let mut secrets = self.secrets.lock().map_err(|_| Self::poisoned())?;
        let secret = secrets
            .iter_mut()
            .find(|s| s.entry.name == secret_id || s.entry.arn == secret_id)
            .ok_or_else(Self::not_found)?;
        secret.value = value.to_string();
        Ok(secret.entry.arn.clone())
    }
}
