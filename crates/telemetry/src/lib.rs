//! Internal telemetry for the attribution engine.
//!
//! Structured logging via `tracing`, in-process metrics and a component
//! health registry. Metrics are logged periodically by the worker.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
