pub mod metrics;
pub mod query;

pub use query::{api_key_query, client_query, password_query};
