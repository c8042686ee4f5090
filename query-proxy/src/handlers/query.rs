//! The three query entry points. Each one checks for its credential, parses
//! the body, then hands a single `PipelineRequest` to the shared pipeline.

use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde_json::Value;
use service_core::{
    axum::{
        body::Bytes,
        extract::State,
        http::{header::AUTHORIZATION, HeaderMap},
        Json,
    },
    error::AppError,
};
use tokio::time::Instant;
use validator::Validate;

use crate::config::PollBudget;
use crate::dtos::{
    ApiKeyQueryRequest, ClientQueryRequest, ErrorResponse, PasswordQueryRequest, QueryResponse,
};
use crate::dtos::query::DEFAULT_TABLE_LIMIT;
use crate::models::Credential;
use crate::services::formatter::format_success;
use crate::services::verifier::parse_authorization;
use crate::services::{PipelineRequest, PollControl, ProxyError, QueryRequest};
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

const PASSWORD_OUTPUT_PREFIX: &str = "oauth-queries/";
const CLIENT_OUTPUT_PREFIX: &str = "client-creds-queries/";
const API_KEY_OUTPUT_PREFIX: &str = "query-results/";

/// Parse a JSON body, treating an empty body as `{}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ProxyError> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(body)
            .map_err(|_| ProxyError::MalformedInput("Invalid JSON in request body".to_string()))?
    };

    serde_json::from_value(value)
        .map_err(|e| ProxyError::MalformedInput(format!("Invalid request body: {}", e)))
}

/// `Some` only for a value with non-whitespace content.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn control(state: &AppState, budget: PollBudget, started: Instant) -> PollControl {
    PollControl::new(
        budget,
        Some(started + state.config.polling.request_timeout),
        state.shutdown.child_token(),
    )
}

async fn run(state: &AppState, request: PipelineRequest) -> Result<Json<QueryResponse>, AppError> {
    let outcome = state.pipeline.execute(request).await?;
    Ok(Json(format_success(outcome)))
}

/// Run a query as a user pool member identified by username and password
#[utoipa::path(
    post,
    path = "/query/password",
    request_body = PasswordQueryRequest,
    responses(
        (status = 200, description = "Query results", body = QueryResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Downstream failure or timeout", body = ErrorResponse)
    ),
    tag = "Query"
)]
pub async fn password_query(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<QueryResponse>, AppError> {
    let started = Instant::now();
    let req: PasswordQueryRequest = parse_body(&body)?;

    let query = present(req.query).ok_or(ProxyError::MissingParameter("query"))?;
    let (username, password) = match (present(req.username), req.password) {
        (Some(username), Some(password)) if !password.expose_secret().is_empty() => {
            (username, password)
        }
        _ => return Err(ProxyError::MissingPasswordCredentials.into()),
    };

    let request = PipelineRequest {
        credential: Credential::Password { username, password },
        query: QueryRequest {
            query,
            database: present(req.database).unwrap_or_else(|| state.config.athena.database.clone()),
            output_location: state.config.athena.output_location(PASSWORD_OUTPUT_PREFIX),
        },
        control: control(&state, state.config.polling.password, started),
    };

    run(&state, request).await
}

/// Run a query as an OAuth client holding a client-credentials access token
#[utoipa::path(
    post,
    path = "/query/client",
    request_body = ClientQueryRequest,
    responses(
        (status = 200, description = "Query results", body = QueryResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Missing, invalid or expired token", body = ErrorResponse),
        (status = 403, description = "Client not authorized", body = ErrorResponse),
        (status = 500, description = "Downstream failure or timeout", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Query"
)]
pub async fn client_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<QueryResponse>, AppError> {
    let started = Instant::now();
    let token = parse_authorization(headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()))?;

    let req: ClientQueryRequest = parse_body(&body)?;
    let query = present(req.query).ok_or(ProxyError::MissingParameter("query"))?;

    let request = PipelineRequest {
        credential: Credential::Bearer { token },
        query: QueryRequest {
            query,
            database: present(req.database).unwrap_or_else(|| state.config.athena.database.clone()),
            output_location: state.config.athena.output_location(CLIENT_OUTPUT_PREFIX),
        },
        control: control(&state, state.config.polling.client, started),
    };

    run(&state, request).await
}

/// Run a query, or read a table, as the owner of a provisioned API key
#[utoipa::path(
    post,
    path = "/query/api-key",
    request_body = ApiKeyQueryRequest,
    responses(
        (status = 200, description = "Query results", body = QueryResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Missing API key", body = ErrorResponse),
        (status = 403, description = "Invalid or unmapped API key", body = ErrorResponse),
        (status = 500, description = "Downstream failure or timeout", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "Query"
)]
pub async fn api_key_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<QueryResponse>, AppError> {
    let started = Instant::now();
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(ProxyError::MissingApiKey)?;
    let key = Secret::new(key.to_string());

    let req: ApiKeyQueryRequest = parse_body(&body)?;
    let (query, database) = api_key_query_text(req, &state.config.athena.database)?;

    let request = PipelineRequest {
        credential: Credential::ApiKey { key },
        query: QueryRequest {
            query,
            database,
            output_location: state.config.athena.output_location(API_KEY_OUTPUT_PREFIX),
        },
        control: control(&state, state.config.polling.api_key, started),
    };

    run(&state, request).await
}

/// Resolve the API-key body to `(query, database)`.
///
/// A custom `query` needs an explicit `database`. A `tableName` is expanded to
/// a bounded `SELECT *` over quoted identifiers.
fn api_key_query_text(
    req: ApiKeyQueryRequest,
    default_database: &str,
) -> Result<(String, String), ProxyError> {
    if let Err(errors) = req.validate() {
        return Err(ProxyError::MalformedInput(validation_message(&errors)));
    }

    let table_name = present(req.table_name);
    let database = present(req.database);

    match (present(req.query), table_name) {
        (Some(query), _) => {
            let database = database.ok_or_else(|| {
                ProxyError::MalformedInput("database required when using custom query".to_string())
            })?;
            Ok((query, database))
        }
        (None, Some(table)) => {
            let database = database.unwrap_or_else(|| default_database.to_string());
            let limit = req.limit.unwrap_or(DEFAULT_TABLE_LIMIT);
            let query = format!(
                "SELECT * FROM {}.{} LIMIT {}",
                quote_identifier("database", &database)?,
                quote_identifier("tableName", &table)?,
                limit
            );
            Ok((query, database))
        }
        (None, None) => Err(ProxyError::MalformedInput(
            "Provide either tableName or query".to_string(),
        )),
    }
}

fn quote_identifier(field: &str, value: &str) -> Result<String, ProxyError> {
    if value.contains('"') {
        return Err(ProxyError::MalformedInput(format!(
            "Invalid identifier in {}",
            field
        )));
    }
    Ok(format!("\"{}\"", value))
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid request body".to_string())
}
