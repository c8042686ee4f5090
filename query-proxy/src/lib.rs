pub mod clients;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;

use service_core::axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::middleware::{
    headers::response_headers_middleware, metrics::metrics_middleware,
    rate_limit::ip_rate_limit_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::ProxyConfig;
use crate::dtos::HealthResponse;
use crate::services::QueryPipeline;
use service_core::error::AppError;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::query::password_query,
        handlers::query::client_query,
        handlers::query::api_key_query,
    ),
    components(
        schemas(
            dtos::PasswordQueryRequest,
            dtos::ClientQueryRequest,
            dtos::ApiKeyQueryRequest,
            dtos::QueryResponse,
            dtos::ErrorResponse,
            dtos::HealthResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Query", description = "Authenticated query execution"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    handlers::query::API_KEY_HEADER,
                ))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub pipeline: Arc<QueryPipeline>,
    pub ip_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
    /// Cancelled on shutdown; in-flight polls end with a timeout.
    pub shutdown: CancellationToken,
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
    })
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let ip_limiter = state.ip_rate_limiter.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/query/password", post(handlers::password_query))
        .route("/query/client", post(handlers::client_query))
        .route("/query/api-key", post(handlers::api_key_query))
        .with_state(state)
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(response_headers_middleware))
        // Answers preflight requests; the fixed header set is stamped above.
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    service_core::axum::http::Method::POST,
                    service_core::axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    service_core::axum::http::header::AUTHORIZATION,
                    service_core::axum::http::header::CONTENT_TYPE,
                    service_core::axum::http::header::HeaderName::from_static("x-amz-date"),
                    service_core::axum::http::header::HeaderName::from_static(
                        handlers::query::API_KEY_HEADER,
                    ),
                ]),
        );

    Ok(app)
}
