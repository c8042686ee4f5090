use secrecy::Secret;
use serde::{Deserialize, Serialize, Serializer};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::ResultSet;

pub const DEFAULT_TABLE_LIMIT: i64 = 10;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordQueryRequest {
    #[schema(example = "dev-user")]
    pub username: Option<String>,

    #[schema(value_type = Option<String>, example = "Password123!")]
    pub password: Option<Secret<String>>,

    #[schema(example = "SELECT * FROM members LIMIT 10")]
    pub query: Option<String>,

    /// Overrides the configured default database.
    #[schema(example = "lf_lh_silver_db")]
    pub database: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClientQueryRequest {
    #[schema(example = "SELECT * FROM members LIMIT 10")]
    pub query: Option<String>,

    #[schema(example = "lf_lh_silver_db")]
    pub database: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyQueryRequest {
    #[schema(example = "members")]
    pub table_name: Option<String>,

    #[schema(example = "lf_lh_silver_db")]
    pub database: Option<String>,

    pub query: Option<String>,

    #[validate(range(min = 1, max = 1000, message = "limit must be between 1 and 1000"))]
    #[schema(example = 10, minimum = 1, maximum = 1000)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[schema(example = true)]
    pub success: bool,

    #[schema(example = "PASSWORD")]
    pub auth_method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "dev-user")]
    pub authenticated_user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_groups: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "etl-service-client")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[schema(example = "arn:aws:iam::123456789012:role/lf-dev")]
    pub lf_role: String,

    #[schema(example = "5f1c2a3b-0000-4000-8000-000000000000")]
    pub query_execution_id: String,

    pub query: String,

    pub columns: Vec<String>,

    /// Data rows only; the header row is not counted.
    pub row_count: usize,

    #[schema(value_type = Vec<Object>)]
    pub data: ResultRecords,
}

/// Rows serialized as objects keyed by column name, in column order.
#[derive(Debug)]
pub struct ResultRecords(pub ResultSet);

impl Serialize for ResultRecords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.records().serialize(serializer)
    }
}
