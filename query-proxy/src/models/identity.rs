use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::role::RoleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStrategy {
    Password,
    ClientCredentials,
    ApiKey,
}

impl AuthStrategy {
    /// Value reported as `authMethod` in success responses.
    pub fn auth_method(&self) -> &'static str {
        match self {
            AuthStrategy::Password => "PASSWORD",
            AuthStrategy::ClientCredentials => "CLIENT_CREDENTIALS",
            AuthStrategy::ApiKey => "API_KEY",
        }
    }

    pub fn session_prefix(&self) -> &'static str {
        match self {
            AuthStrategy::Password => "cognito-user",
            AuthStrategy::ClientCredentials => "client",
            AuthStrategy::ApiKey => "lf-athena-session",
        }
    }

    /// Whether an identity no mapping rule matched falls back to the standard role.
    /// Client-credential callers never get a default role.
    pub fn defaults_to_standard_role(&self) -> bool {
        match self {
            AuthStrategy::Password | AuthStrategy::ApiKey => true,
            AuthStrategy::ClientCredentials => false,
        }
    }
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthStrategy::Password => write!(f, "password"),
            AuthStrategy::ClientCredentials => write!(f, "client_credentials"),
            AuthStrategy::ApiKey => write!(f, "api_key"),
        }
    }
}

/// Identity established by a successful verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub strategy: AuthStrategy,
    pub principal: String,
    pub groups: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    pub token_use: Option<String>,
    /// Role bound to the credential by the mapping store (API keys only).
    pub bound_role: Option<RoleId>,
}

impl VerifiedIdentity {
    pub fn new(strategy: AuthStrategy, principal: impl Into<String>) -> Self {
        Self {
            strategy,
            principal: principal.into(),
            groups: Vec::new(),
            attributes: BTreeMap::new(),
            client_id: None,
            scopes: Vec::new(),
            token_use: None,
            bound_role: None,
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>, scopes: Vec<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.scopes = scopes;
        self
    }

    pub fn with_bound_role(mut self, role: RoleId) -> Self {
        self.bound_role = Some(role);
        self
    }

    /// Principal used to derive the broker session name.
    pub fn session_hint(&self) -> &str {
        self.client_id.as_deref().unwrap_or(&self.principal)
    }
}
