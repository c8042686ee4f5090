use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::types::AuthFlowType;
use secrecy::{ExposeSecret, Secret};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::sdk::{next_token as next_token_of, AwsError};

/// Provider error code used when password auth answers with a challenge
/// instead of tokens.
pub const CHALLENGE_REQUIRED: &str = "ChallengeRequired";

/// Token lifetime assumed when the provider omits `ExpiresIn`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Tokens issued by a successful password grant.
#[derive(Debug)]
pub struct TokenSet {
    pub access_token: Secret<String>,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub attributes: BTreeMap<String, String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn initiate_password_auth(
        &self,
        username: &str,
        password: &Secret<String>,
        secret_hash: &str,
    ) -> Result<TokenSet, AwsError>;

    async fn get_user(&self, access_token: &Secret<String>) -> Result<UserProfile, AwsError>;

    async fn list_groups(&self, username: &str) -> Result<Vec<String>, AwsError>;
}

pub struct CognitoClient {
    client: aws_sdk_cognitoidentityprovider::Client,
    client_id: String,
    user_pool_id: String,
}

impl CognitoClient {
    pub fn new(
        client: aws_sdk_cognitoidentityprovider::Client,
        client_id: impl Into<String>,
        user_pool_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            user_pool_id: user_pool_id.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for CognitoClient {
    async fn initiate_password_auth(
        &self,
        username: &str,
        password: &Secret<String>,
        secret_hash: &str,
    ) -> Result<TokenSet, AwsError> {
        let response = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", username)
            .auth_parameters("PASSWORD", password.expose_secret())
            .auth_parameters("SECRET_HASH", secret_hash)
            .send()
            .await?;

        let tokens = response
            .authentication_result()
            .and_then(|result| result.access_token().map(|token| (token, result.expires_in())));

        match tokens {
            Some((access_token, expires_in)) => Ok(TokenSet {
                access_token: Secret::new(access_token.to_string()),
                expires_in: if expires_in > 0 {
                    i64::from(expires_in)
                } else {
                    DEFAULT_EXPIRES_IN
                },
            }),
            None => Err(AwsError::service(
                CHALLENGE_REQUIRED,
                format!(
                    "Authentication requires challenge {}",
                    response
                        .challenge_name()
                        .map(|c| c.as_str())
                        .unwrap_or("UNKNOWN")
                ),
            )),
        }
    }

    async fn get_user(&self, access_token: &Secret<String>) -> Result<UserProfile, AwsError> {
        let response = self
            .client
            .get_user()
            .access_token(access_token.expose_secret())
            .send()
            .await?;

        Ok(UserProfile {
            username: response.username().to_string(),
            attributes: response
                .user_attributes()
                .iter()
                .map(|a| (a.name().to_string(), a.value().unwrap_or_default().to_string()))
                .collect(),
        })
    }

    async fn list_groups(&self, username: &str) -> Result<Vec<String>, AwsError> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .admin_list_groups_for_user()
                .user_pool_id(&self.user_pool_id)
                .username(username)
                .set_next_token(next_token.take())
                .send()
                .await?;

            groups.extend(
                response
                    .groups()
                    .iter()
                    .filter_map(|g| g.group_name().map(str::to_string)),
            );

            match next_token_of(response.next_token()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(groups)
    }
}

/// In-memory identity provider for tests and local runs.
pub struct MockIdentityProvider {
    users: Mutex<HashMap<String, MockUser>>,
    pub fail_group_lookup: bool,
    pub unavailable: bool,
    pub auth_calls: AtomicUsize,
}

struct MockUser {
    password: String,
    groups: Vec<String>,
    attributes: BTreeMap<String, String>,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            fail_group_lookup: false,
            unavailable: false,
            auth_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_user(self, username: &str, password: &str, groups: &[&str]) -> Self {
        self.with_user_attributes(username, password, groups, &[])
    }

    pub fn with_user_attributes(
        self,
        username: &str,
        password: &str,
        groups: &[&str],
        attributes: &[(&str, &str)],
    ) -> Self {
        if let Ok(mut users) = self.users.lock() {
            users.insert(
                username.to_string(),
                MockUser {
                    password: password.to_string(),
                    groups: groups.iter().map(|g| g.to_string()).collect(),
                    attributes: attributes
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
            );
        }
        self
    }

    pub fn auth_call_count(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    fn not_authorized() -> AwsError {
        AwsError::service("NotAuthorizedException", "Incorrect username or password.")
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn initiate_password_auth(
        &self,
        username: &str,
        password: &Secret<String>,
        secret_hash: &str,
    ) -> Result<TokenSet, AwsError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable {
            return Err(AwsError::Transport("connection refused".to_string()));
        }
        if secret_hash.is_empty() {
            return Err(Self::not_authorized());
        }

        let users = self
            .users
            .lock()
            .map_err(|_| AwsError::Transport("mock poisoned".to_string()))?;
        match users.get(username) {
            Some(user) if user.password == *password.expose_secret() => Ok(TokenSet {
                access_token: Secret::new(format!("access-{}", username)),
                expires_in: 3600,
            }),
            _ => Err(Self::not_authorized()),
        }
    }

    async fn get_user(&self, access_token: &Secret<String>) -> Result<UserProfile, AwsError> {
        let username = access_token
            .expose_secret()
            .strip_prefix("access-")
            .ok_or_else(Self::not_authorized)?;
        let users = self
            .users
            .lock()
            .map_err(|_| AwsError::Transport("mock poisoned".to_string()))?;
        let user = users.get(username).ok_or_else(Self::not_authorized)?;

        Ok(UserProfile {
            username: username.to_string(),
            attributes: user.attributes.clone(),
        })
    }

    async fn list_groups(&self, username: &str) -> Result<Vec<String>, AwsError> {
        if self.fail_group_lookup {
            return Err(AwsError::service(
                "AccessDeniedException",
                "Not authorized to list groups",
            ));
        }
        let users = self
            .users
            .lock()
            .map_err(|_| AwsError::Transport("mock poisoned".to_string()))?;
        Ok(users
            .get(username)
            .map(|u| u.groups.clone())
            .unwrap_or_default())
    }
}
