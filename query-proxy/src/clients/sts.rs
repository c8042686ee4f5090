use async_trait::async_trait;
use aws_sdk_sts::types::Credentials;
use chrono::{TimeZone, Utc};
use secrecy::Secret;
use std::sync::Mutex;

use super::sdk::AwsError;
use crate::models::{RoleId, ScopedCredential};

#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(
        &self,
        role: &RoleId,
        session_name: &str,
        duration_secs: u32,
    ) -> Result<ScopedCredential, AwsError>;
}

pub struct StsClient {
    client: aws_sdk_sts::Client,
}

impl StsClient {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

fn scoped_credential(role: &RoleId, credentials: &Credentials) -> Result<ScopedCredential, AwsError> {
    let expiration = credentials.expiration();
    let expires_at = Utc
        .timestamp_opt(expiration.secs(), expiration.subsec_nanos())
        .single()
        .ok_or_else(|| AwsError::Decode(format!("invalid expiration {}", expiration)))?;

    Ok(ScopedCredential {
        access_key_id: credentials.access_key_id().to_string(),
        secret_access_key: Secret::new(credentials.secret_access_key().to_string()),
        session_token: Secret::new(credentials.session_token().to_string()),
        expires_at,
        role: role.clone(),
    })
}

#[async_trait]
impl RoleAssumer for StsClient {
    async fn assume_role(
        &self,
        role: &RoleId,
        session_name: &str,
        duration_secs: u32,
    ) -> Result<ScopedCredential, AwsError> {
        let response = self
            .client
            .assume_role()
            .role_arn(role.as_str())
            .role_session_name(session_name)
            .duration_seconds(i32::try_from(duration_secs).unwrap_or(i32::MAX))
            .send()
            .await?;

        let credentials = response
            .credentials()
            .ok_or_else(|| AwsError::Decode("AssumeRole returned no credentials".to_string()))?;
        scoped_credential(role, credentials)
    }
}

/// Records every assumption and mints fake credentials.
#[derive(Default)]
pub struct MockRoleAssumer {
    pub calls: Mutex<Vec<(RoleId, String, u32)>>,
    /// Roles the mock refuses, answering like a trust-policy rejection.
    pub denied_roles: Vec<RoleId>,
    /// Hand out credentials that have already lapsed, like a skewed clock.
    pub issue_expired: bool,
}

impl MockRoleAssumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying(role: RoleId) -> Self {
        Self {
            denied_roles: vec![role],
            ..Self::default()
        }
    }

    pub fn issuing_expired() -> Self {
        Self {
            issue_expired: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(RoleId, String, u32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RoleAssumer for MockRoleAssumer {
    async fn assume_role(
        &self,
        role: &RoleId,
        session_name: &str,
        duration_secs: u32,
    ) -> Result<ScopedCredential, AwsError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((role.clone(), session_name.to_string(), duration_secs));
        }

        if self.denied_roles.contains(role) {
            return Err(AwsError::service(
                "AccessDenied",
                format!(
                    "User is not authorized to perform: sts:AssumeRole on resource: {}",
                    role
                ),
            ));
        }

        let lifetime = if self.issue_expired {
            chrono::Duration::seconds(-1)
        } else {
            chrono::Duration::seconds(i64::from(duration_secs))
        };
        Ok(ScopedCredential {
            access_key_id: format!("ASIA{}", uuid::Uuid::new_v4().simple()),
            secret_access_key: Secret::new("mock-secret".to_string()),
            session_token: Secret::new("mock-session-token".to_string()),
            expires_at: Utc::now() + lifetime,
            role: role.clone(),
        })
    }
}
