pub mod headers;
pub mod metrics;
pub mod rate_limit;
pub mod tracing;
