//! Test helpers for query-proxy integration tests.
//!
//! Builds the full router around in-memory collaborators and drives it with
//! `tower::ServiceExt::oneshot`; nothing touches the network.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use query_proxy::{
    build_router,
    clients::{
        athena::{MockQueryBackendFactory, MockQueryState},
        cognito::MockIdentityProvider,
        dynamodb::MockMappingStore,
        secrets_manager::MockSecretStore,
        sts::MockRoleAssumer,
        StaticKeySource,
    },
    config::{
        AthenaConfig, AwsConfig, ApiKeyConfig, CognitoConfig, Environment, PollBudget,
        PollingConfig, ProxyConfig, RateLimitConfig, RoleConfig,
    },
    models::{ResultPage, RoleTier},
    services::{Collaborators, QueryPipeline},
    AppState,
};
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const STANDARD_ROLE: &str = "arn:aws:iam::123456789012:role/lf-dev-role";
pub const ELEVATED_ROLE: &str = "arn:aws:iam::123456789012:role/lf-super-role";
pub const USER_POOL_ID: &str = "us-east-1_TestPool";
pub const ISSUER: &str = "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_TestPool";

const SIGNING_KEY: &str = include_str!("../fixtures/jwt_signing_key.pem");
const VERIFYING_KEY: &str = include_str!("../fixtures/jwt_verifying_key.pem");

pub fn test_config() -> ProxyConfig {
    ProxyConfig {
        common: service_core::config::Config { port: 8080 },
        environment: Environment::Dev,
        service_name: "query-proxy-test".to_string(),
        service_version: "0.0.0-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        aws: AwsConfig {
            region: "us-east-1".to_string(),
            endpoint_url: None,
        },
        cognito: CognitoConfig {
            user_pool_id: USER_POOL_ID.to_string(),
            client_id: "test-app-client".to_string(),
            client_secret: Secret::new("test-app-client-secret".to_string()),
            region: "us-east-1".to_string(),
            group_lookup_required: false,
            identity_cache_enabled: true,
        },
        roles: RoleConfig {
            standard_role_arn: STANDARD_ROLE.to_string(),
            elevated_role_arn: ELEVATED_ROLE.to_string(),
            elevated_groups: vec![
                "Admins".to_string(),
                "SuperUsers".to_string(),
                "DataEngineers".to_string(),
            ],
            standard_groups: vec![
                "Developers".to_string(),
                "Analysts".to_string(),
                "DataScientists".to_string(),
            ],
            role_attribute: "custom:lf_role".to_string(),
            client_mappings: vec![
                ("etl-service".to_string(), RoleTier::Elevated),
                ("reporting-service".to_string(), RoleTier::Standard),
                ("monitoring-service".to_string(), RoleTier::Standard),
            ],
            scope_mappings: vec![
                ("athena-api/query.admin".to_string(), RoleTier::Elevated),
                ("athena-api/query.write".to_string(), RoleTier::Elevated),
                ("athena-api/query.read".to_string(), RoleTier::Standard),
            ],
        },
        athena: AthenaConfig {
            database: "lakehouse_db".to_string(),
            output_bucket: "query-results-bucket".to_string(),
            workgroup: Some("primary".to_string()),
        },
        api_keys: ApiKeyConfig {
            environment: "dev".to_string(),
            table_name: "lf-apikey-mappings-apk-dev".to_string(),
            scan_fallback: true,
        },
        polling: PollingConfig {
            password: PollBudget::new(Duration::from_secs(1), Duration::from_secs(30)),
            client: PollBudget::new(Duration::from_secs(1), Duration::from_secs(30)),
            api_key: PollBudget::new(Duration::from_secs(2), Duration::from_secs(60)),
            request_timeout: Duration::from_secs(120),
        },
        rate_limit: RateLimitConfig {
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
    }
}

/// Router plus handles on every mock it was built with.
pub struct TestApp {
    pub router: axum::Router,
    pub identity: Arc<MockIdentityProvider>,
    pub secrets: Arc<MockSecretStore>,
    pub mappings: Arc<MockMappingStore>,
    pub roles: Arc<MockRoleAssumer>,
    pub queries: Arc<MockQueryState>,
    pub shutdown: CancellationToken,
}

pub struct TestAppBuilder {
    config: ProxyConfig,
    identity: MockIdentityProvider,
    secrets: MockSecretStore,
    mappings: MockMappingStore,
    roles: MockRoleAssumer,
    queries: Arc<MockQueryState>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            identity: MockIdentityProvider::new(),
            secrets: MockSecretStore::new(),
            mappings: MockMappingStore::new(),
            roles: MockRoleAssumer::new(),
            queries: MockQueryState::new(),
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut ProxyConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn identity(mut self, identity: MockIdentityProvider) -> Self {
        self.identity = identity;
        self
    }

    pub fn secrets(mut self, secrets: MockSecretStore) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn mappings(mut self, mappings: MockMappingStore) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn roles(mut self, roles: MockRoleAssumer) -> Self {
        self.roles = roles;
        self
    }

    pub async fn build(self) -> TestApp {
        let identity = Arc::new(self.identity);
        let secrets = Arc::new(self.secrets);
        let mappings = Arc::new(self.mappings);
        let roles = Arc::new(self.roles);
        let queries = self.queries;

        let collaborators = Collaborators {
            identity_provider: identity.clone(),
            key_source: Arc::new(
                StaticKeySource::from_rsa_pem(VERIFYING_KEY.as_bytes())
                    .expect("fixture verifying key"),
            ),
            secret_store: secrets.clone(),
            mapping_store: mappings.clone(),
            role_assumer: roles.clone(),
            backend_factory: Arc::new(MockQueryBackendFactory::new(queries.clone())),
        };

        let shutdown = CancellationToken::new();
        let state = AppState {
            pipeline: Arc::new(QueryPipeline::new(&self.config, collaborators)),
            ip_rate_limiter: service_core::middleware::rate_limit::create_ip_rate_limiter(
                self.config.rate_limit.global_ip_limit,
                self.config.rate_limit.global_ip_window_seconds,
            ),
            config: self.config,
            shutdown: shutdown.clone(),
        };

        TestApp {
            router: build_router(state).await.expect("router"),
            identity,
            secrets,
            mappings,
            roles,
            queries,
            shutdown,
        }
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub fn assumed_roles(&self) -> Vec<String> {
        self.roles
            .calls()
            .into_iter()
            .map(|(role, _, _)| role.to_string())
            .collect()
    }
}

/// `POST` with a JSON body and extra headers.
pub fn post(uri: &str, headers: &[(&str, &str)], body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn post_raw(uri: &str, headers: &[(&str, &str)], body: &'static str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body)).expect("request")
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// A page of text rows; `None` cells model SQL NULL.
pub fn page(rows: &[&[Option<&str>]]) -> ResultPage {
    ResultPage {
        rows: rows
            .iter()
            .map(|row| row.iter().map(|c| c.map(str::to_string)).collect())
            .collect(),
        next_token: None,
    }
}

pub fn access_claims(client_id: &str, scope: &str) -> serde_json::Value {
    serde_json::json!({
        "sub": client_id,
        "client_id": client_id,
        "iss": ISSUER,
        "token_use": "access",
        "scope": scope,
        "exp": chrono::Utc::now().timestamp() + 3600,
    })
}

/// RS256 token signed with the fixture key the test app trusts.
pub fn sign_token(claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-kid".to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).expect("fixture signing key");
    encode(&header, claims, &key).expect("token")
}
