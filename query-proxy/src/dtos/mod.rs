pub mod query;

pub use query::{
    ApiKeyQueryRequest, ClientQueryRequest, PasswordQueryRequest, QueryResponse, ResultRecords,
};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = false)]
    pub success: bool,
    #[schema(example = "Invalid or expired token")]
    pub error: String,
    /// Present as `TIMEOUT` when the query outlived its poll budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "TIMEOUT")]
    pub status: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "query-proxy")]
    pub service: String,
    #[schema(example = "1.0.0")]
    pub version: String,
}
