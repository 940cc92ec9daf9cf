//! # Grindvakt Telemetry
//!
//! Crate for logging, security events and metrics.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
