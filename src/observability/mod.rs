//! Observability module.
//!
//! Logging and metrics infrastructure for monitoring what the monitor
//! itself is doing: tick cadence, probe health, and notification delivery.

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
