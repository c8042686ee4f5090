use std::sync::Arc;

use clap::Parser;
use query_proxy::clients::{load_sdk_config, DynamoDbMappingStore, SecretsManagerClient};
use query_proxy::models::api_key::default_table_name;
use query_proxy::services::{ApiKeyProvisioner, ProvisionRequest};
use secrecy::{ExposeSecret, Secret};
use service_core::observability::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "provision-api-key")]
#[command(about = "Create or rotate an API key bound to a Lake Formation role", long_about = None)]
#[command(version)]
struct Args {
    /// Key owner; embedded in the secret name
    #[arg(long)]
    user_name: String,

    /// Role assumed for queries made with this key
    #[arg(long)]
    role_arn: String,

    /// Permission level recorded with the binding
    #[arg(long, default_value = "read-only")]
    permissions: String,

    /// Use this key instead of generating one
    #[arg(long, env = "PROVISION_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Deployment environment suffix
    #[arg(long, default_value = "dev")]
    environment: String,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Overwrite an existing secret even if its current key cannot be read
    #[arg(long)]
    force: bool,

    /// Mapping table (defaults to the environment's table)
    #[arg(long)]
    table_name: Option<String>,

    /// Endpoint override for local stacks
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing("provision-api-key", &args.log_level, None)?;

    let sdk_config = load_sdk_config(&args.region, args.endpoint_url.as_deref()).await;
    let table_name = args
        .table_name
        .clone()
        .unwrap_or_else(|| default_table_name(&args.environment));

    let provisioner = ApiKeyProvisioner::new(
        Arc::new(SecretsManagerClient::new(
            aws_sdk_secretsmanager::Client::new(&sdk_config),
        )),
        Arc::new(DynamoDbMappingStore::new(
            aws_sdk_dynamodb::Client::new(&sdk_config),
            &table_name,
        )),
    );

    let provisioned = provisioner
        .provision(ProvisionRequest {
            user_name: args.user_name.clone(),
            role_arn: args.role_arn.clone(),
            permissions: args.permissions.clone(),
            api_key: args.api_key.map(Secret::new),
            environment: args.environment.clone(),
            force: args.force,
        })
        .await?;

    println!(
        "{} API key for '{}'",
        if provisioned.rotated { "Rotated" } else { "Created" },
        args.user_name
    );
    println!("  Secret:      {}", provisioned.secret_name);
    println!("  Secret ARN:  {}", provisioned.secret_arn);
    println!("  Role:        {}", args.role_arn);
    println!("  Permissions: {}", args.permissions);
    println!("  Table:       {}", table_name);
    println!();
    println!("API key (shown once): {}", provisioned.api_key.expose_secret());
    println!();
    println!("Example:");
    println!(
        "  curl -X POST <endpoint>/query/api-key -H 'x-api-key: <key>' \\\n    -H 'Content-Type: application/json' -d '{{\"tableName\":\"<table>\",\"limit\":10}}'"
    );

    Ok(())
}
