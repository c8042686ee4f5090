use query_proxy::{
    build_router,
    clients::{
        load_sdk_config, AthenaBackendFactory, CognitoClient, DynamoDbMappingStore, JwksKeySource,
        SecretsManagerClient, StsClient,
    },
    config::ProxyConfig,
    services::{Collaborators, QueryPipeline},
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = ProxyConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(AppError::ConfigError)?;

    query_proxy::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        region = %config.aws.region,
        "Starting query proxy"
    );

    let endpoint_url = config.aws.endpoint_url.as_deref();
    let sdk_config = load_sdk_config(&config.aws.region, endpoint_url).await;
    let cognito_config = if config.cognito.region == config.aws.region {
        sdk_config.clone()
    } else {
        load_sdk_config(&config.cognito.region, endpoint_url).await
    };

    // JWKS documents are plain HTTPS fetches outside the SDK.
    let http = reqwest::Client::builder()
        .timeout(config.polling.request_timeout)
        .build()
        .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

    let collaborators = Collaborators {
        identity_provider: Arc::new(CognitoClient::new(
            aws_sdk_cognitoidentityprovider::Client::new(&cognito_config),
            &config.cognito.client_id,
            &config.cognito.user_pool_id,
        )),
        key_source: Arc::new(JwksKeySource::new(http, config.cognito.jwks_url())),
        secret_store: Arc::new(SecretsManagerClient::new(
            aws_sdk_secretsmanager::Client::new(&sdk_config),
        )),
        mapping_store: Arc::new(DynamoDbMappingStore::new(
            aws_sdk_dynamodb::Client::new(&sdk_config),
            &config.api_keys.table_name,
        )),
        role_assumer: Arc::new(StsClient::new(aws_sdk_sts::Client::new(&sdk_config))),
        backend_factory: Arc::new(AthenaBackendFactory::new(sdk_config)),
    };
    tracing::info!(
        issuer = %config.cognito.issuer(),
        mapping_table = %config.api_keys.table_name,
        "Collaborator clients initialized"
    );

    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let shutdown = CancellationToken::new();
    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(QueryPipeline::new(&config, collaborators)),
        ip_rate_limiter,
        shutdown: shutdown.clone(),
    };
    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // In-flight poll loops stop waiting and report a timeout.
    shutdown.cancel();
}
