use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::models::api_key;
use crate::models::role::{RoleBinding, RoleBindingTable, RoleId, RoleSignal, RoleTier};

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub aws: AwsConfig,
    pub cognito: CognitoConfig,
    pub roles: RoleConfig,
    pub athena: AthenaConfig,
    pub api_keys: ApiKeyConfig,
    pub polling: PollingConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CognitoConfig {
    pub user_pool_id: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub region: String,
    pub group_lookup_required: bool,
    pub identity_cache_enabled: bool,
}

impl CognitoConfig {
    /// Issuer URI every access token minted by the pool carries in `iss`.
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.issuer())
    }
}

#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub standard_role_arn: String,
    pub elevated_role_arn: String,
    pub elevated_groups: Vec<String>,
    pub standard_groups: Vec<String>,
    pub role_attribute: String,
    /// Ordered `client-id fragment -> tier` pairs; earlier entries win ties.
    pub client_mappings: Vec<(String, RoleTier)>,
    pub scope_mappings: Vec<(String, RoleTier)>,
}

impl RoleConfig {
    pub fn role_for(&self, tier: RoleTier) -> RoleId {
        match tier {
            RoleTier::Elevated => RoleId::new(&self.elevated_role_arn),
            RoleTier::Standard => RoleId::new(&self.standard_role_arn),
        }
    }

    /// Expand the configured tables into the binding table used by the role mapper.
    pub fn binding_table(&self) -> RoleBindingTable {
        let mut bindings = Vec::new();

        for group in &self.elevated_groups {
            bindings.push(RoleBinding::new(
                RoleSignal::Group(group.clone()),
                self.role_for(RoleTier::Elevated),
                0,
            ));
        }
        for group in &self.standard_groups {
            bindings.push(RoleBinding::new(
                RoleSignal::Group(group.clone()),
                self.role_for(RoleTier::Standard),
                1,
            ));
        }

        bindings.push(RoleBinding::new(
            RoleSignal::Attribute {
                name: self.role_attribute.clone(),
                value: "super".to_string(),
            },
            self.role_for(RoleTier::Elevated),
            0,
        ));

        for (rank, (fragment, tier)) in self.client_mappings.iter().enumerate() {
            bindings.push(RoleBinding::new(
                RoleSignal::ClientIdContains(fragment.to_lowercase()),
                self.role_for(*tier),
                rank as u32,
            ));
        }

        for (scope, tier) in &self.scope_mappings {
            let rank = match tier {
                RoleTier::Elevated => 0,
                RoleTier::Standard => 1,
            };
            bindings.push(RoleBinding::new(
                RoleSignal::Scope(scope.clone()),
                self.role_for(*tier),
                rank,
            ));
        }

        RoleBindingTable::new(bindings, self.role_for(RoleTier::Standard))
    }
}

#[derive(Debug, Clone)]
pub struct AthenaConfig {
    pub database: String,
    pub output_bucket: String,
    pub workgroup: Option<String>,
}

impl AthenaConfig {
    pub fn output_location(&self, prefix: &str) -> String {
        format!("s3://{}/{}", self.output_bucket.trim_end_matches('/'), prefix)
    }
}

#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    pub environment: String,
    pub table_name: String,
    pub scan_fallback: bool,
}

/// Fixed-interval poll schedule with an upper bound on total wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollBudget {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub password: PollBudget,
    pub client: PollBudget,
    pub api_key: PollBudget,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let region = get_env("AWS_REGION", Some("us-east-1"), is_prod)?;
        let api_key_environment = get_env("API_KEY_ENVIRONMENT", Some("dev"), is_prod)?;
        let default_table = api_key::default_table_name(&api_key_environment);

        let config = ProxyConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("query-proxy"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            aws: AwsConfig {
                region: region.clone(),
                endpoint_url: get_optional_env("AWS_ENDPOINT_URL"),
            },
            cognito: CognitoConfig {
                user_pool_id: get_env("COGNITO_USER_POOL_ID", None, is_prod)?,
                client_id: get_env("COGNITO_CLIENT_ID", None, is_prod)?,
                client_secret: Secret::new(get_env("COGNITO_CLIENT_SECRET", None, is_prod)?),
                region: get_env("COGNITO_REGION", Some(&region), is_prod)?,
                group_lookup_required: parse_bool(
                    "GROUP_LOOKUP_REQUIRED",
                    &get_env("GROUP_LOOKUP_REQUIRED", Some("false"), is_prod)?,
                )?,
                identity_cache_enabled: parse_bool(
                    "IDENTITY_CACHE_ENABLED",
                    &get_env("IDENTITY_CACHE_ENABLED", Some("true"), is_prod)?,
                )?,
            },
            roles: RoleConfig {
                standard_role_arn: get_env("LF_DEV_ROLE_ARN", None, is_prod)?,
                elevated_role_arn: get_env("LF_SUPER_ROLE_ARN", None, is_prod)?,
                elevated_groups: parse_list(&get_env(
                    "ELEVATED_GROUPS",
                    Some("Admins,SuperUsers,DataEngineers"),
                    is_prod,
                )?),
                standard_groups: parse_list(&get_env(
                    "STANDARD_GROUPS",
                    Some("Developers,Analysts,DataScientists"),
                    is_prod,
                )?),
                role_attribute: get_env("ROLE_ATTRIBUTE", Some("custom:lf_role"), is_prod)?,
                client_mappings: parse_tier_table(
                    "CLIENT_ROLE_MAPPINGS",
                    &get_env(
                        "CLIENT_ROLE_MAPPINGS",
                        Some("etl-service=elevated,reporting-service=standard,monitoring-service=standard"),
                        is_prod,
                    )?,
                )?,
                scope_mappings: parse_tier_table(
                    "SCOPE_ROLE_MAPPINGS",
                    &get_env(
                        "SCOPE_ROLE_MAPPINGS",
                        Some("athena-api/query.admin=elevated,athena-api/query.write=elevated,athena-api/query.read=standard"),
                        is_prod,
                    )?,
                )?,
            },
            athena: AthenaConfig {
                database: get_env("DATABASE_NAME", None, is_prod)?,
                output_bucket: get_env("ATHENA_OUTPUT_BUCKET", None, is_prod)?,
                workgroup: Some(get_env("ATHENA_WORKGROUP", Some("primary"), is_prod)?)
                    .filter(|w| !w.trim().is_empty()),
            },
            api_keys: ApiKeyConfig {
                table_name: get_env("API_KEY_TABLE", Some(&default_table), is_prod)?,
                environment: api_key_environment,
                scan_fallback: parse_bool(
                    "API_KEY_SCAN_FALLBACK",
                    &get_env("API_KEY_SCAN_FALLBACK", Some("true"), is_prod)?,
                )?,
            },
            polling: PollingConfig {
                password: poll_budget("PASSWORD", "1000", "30", is_prod)?,
                client: poll_budget("CLIENT", "1000", "30", is_prod)?,
                api_key: poll_budget("API_KEY", "2000", "60", is_prod)?,
                request_timeout: Duration::from_secs(parse_number(
                    "REQUEST_TIMEOUT_SECS",
                    &get_env("REQUEST_TIMEOUT_SECS", Some("29"), is_prod)?,
                )?),
            },
            rate_limit: RateLimitConfig {
                global_ip_limit: parse_number(
                    "RATE_LIMIT_GLOBAL_IP_LIMIT",
                    &get_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?,
                )?,
                global_ip_window_seconds: parse_number(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    &get_env("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", Some("60"), is_prod)?,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.roles.standard_role_arn.trim().is_empty()
            || self.roles.elevated_role_arn.trim().is_empty()
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LF_DEV_ROLE_ARN and LF_SUPER_ROLE_ARN must not be empty"
            )));
        }

        for (name, budget) in [
            ("PASSWORD", &self.polling.password),
            ("CLIENT", &self.polling.client),
            ("API_KEY", &self.polling.api_key),
        ] {
            if budget.interval.is_zero() || budget.max_wait.is_zero() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{}_POLL_INTERVAL_MS and {}_MAX_WAIT_SECS must be positive",
                    name,
                    name
                )));
            }
        }

        if self.polling.request_timeout.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REQUEST_TIMEOUT_SECS must be positive"
            )));
        }

        if self.environment == Environment::Prod && self.api_keys.scan_fallback {
            tracing::warn!(
                "API key secret scan fallback is enabled in production; provision index items and disable API_KEY_SCAN_FALLBACK"
            );
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn poll_budget(
    prefix: &str,
    interval_ms: &str,
    max_wait_secs: &str,
    is_prod: bool,
) -> Result<PollBudget, AppError> {
    let interval_key = format!("{}_POLL_INTERVAL_MS", prefix);
    let max_wait_key = format!("{}_MAX_WAIT_SECS", prefix);

    let interval = parse_number(
        &interval_key,
        &get_env(&interval_key, Some(interval_ms), is_prod)?,
    )?;
    let max_wait = parse_number(
        &max_wait_key,
        &get_env(&max_wait_key, Some(max_wait_secs), is_prod)?,
    )?;

    Ok(PollBudget::new(
        Duration::from_millis(interval),
        Duration::from_secs(max_wait),
    ))
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, AppError> {
    value
        .trim()
        .to_lowercase()
        .parse()
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} must be true or false", key)))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `key=tier,key=tier` keeping the declared order.
pub(crate) fn parse_tier_table(key: &str, value: &str) -> Result<Vec<(String, RoleTier)>, AppError> {
    parse_list(value)
        .into_iter()
        .map(|entry| {
            let (name, tier) = entry.split_once('=').ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "{}: entry '{}' must be name=tier",
                    key,
                    entry
                ))
            })?;
            let tier: RoleTier = tier
                .trim()
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))?;
            Ok((name.trim().to_string(), tier))
        })
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
