/// Observability module for metrics and tracing
pub mod metrics;
pub mod tracing_setup;
