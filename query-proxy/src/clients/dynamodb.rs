use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::sync::Mutex;

use super::sdk::AwsError;
use crate::models::ApiKeyBinding;

/// Partition key attribute of the mapping table.
pub const KEY_ATTRIBUTE: &str = "secretId";

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get_binding(&self, secret_id: &str) -> Result<Option<ApiKeyBinding>, AwsError>;

    async fn put_binding(&self, binding: &ApiKeyBinding) -> Result<(), AwsError>;

    /// Remove an item; removing a missing item is not an error.
    async fn delete_binding(&self, secret_id: &str) -> Result<(), AwsError>;
}

pub struct DynamoDbMappingStore {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoDbMappingStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn string_attribute(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
}

pub(crate) fn binding_from_item(
    secret_id: &str,
    item: &HashMap<String, AttributeValue>,
) -> Result<ApiKeyBinding, AwsError> {
    let role_arn = string_attribute(item, "roleArn")
        .filter(|arn| !arn.is_empty())
        .ok_or_else(|| AwsError::Decode(format!("mapping item {} has no roleArn", secret_id)))?;

    Ok(ApiKeyBinding {
        secret_id: secret_id.to_string(),
        role_arn,
        user_name: string_attribute(item, "userName").unwrap_or_default(),
        permissions: string_attribute(item, "permissions").unwrap_or_default(),
    })
}

#[async_trait]
impl MappingStore for DynamoDbMappingStore {
    async fn get_binding(&self, secret_id: &str) -> Result<Option<ApiKeyBinding>, AwsError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(KEY_ATTRIBUTE, AttributeValue::S(secret_id.to_string()))
            .consistent_read(true)
            .send()
            .await?;

        response
            .item()
            .map(|item| binding_from_item(secret_id, item))
            .transpose()
    }

    async fn put_binding(&self, binding: &ApiKeyBinding) -> Result<(), AwsError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(KEY_ATTRIBUTE, AttributeValue::S(binding.secret_id.clone()))
            .item("roleArn", AttributeValue::S(binding.role_arn.clone()))
            .item("userName", AttributeValue::S(binding.user_name.clone()))
            .item("permissions", AttributeValue::S(binding.permissions.clone()))
            .item("createdAt", AttributeValue::S(chrono::Utc::now().to_rfc3339()))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_binding(&self, secret_id: &str) -> Result<(), AwsError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(KEY_ATTRIBUTE, AttributeValue::S(secret_id.to_string()))
            .send()
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockMappingStore {
    items: Mutex<HashMap<String, ApiKeyBinding>>,
    pub unavailable: bool,
}

impl MockMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(self, binding: ApiKeyBinding) -> Self {
        if let Ok(mut items) = self.items.lock() {
            items.insert(binding.secret_id.clone(), binding);
        }
        self
    }

    pub fn binding(&self, secret_id: &str) -> Option<ApiKeyBinding> {
        self.items
            .lock()
            .ok()
            .and_then(|items| items.get(secret_id).cloned())
    }
}

#[async_trait]
impl MappingStore for MockMappingStore {
    async fn get_binding(&self, secret_id: &str) -> Result<Option<ApiKeyBinding>, AwsError> {
        if self.unavailable {
            return Err(AwsError::Transport("connection refused".to_string()));
        }
        Ok(self.binding(secret_id))
    }

    async fn put_binding(&self, binding: &ApiKeyBinding) -> Result<(), AwsError> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| AwsError::Transport("mock poisoned".to_string()))?;
        items.insert(binding.secret_id.clone(), binding.clone());
        Ok(())
    }

    async fn delete_binding(&self, secret_id: &str) -> Result<(), AwsError> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| AwsError::Transport("mock poisoned".to_string()))?;
        items.remove(secret_id);
        Ok(())
    }
}
