//! ## grindvakt-telemetry::logging
//! **Structured logging with tracing and OpenTelemetry attributes**
//!
//! Every change to a rule set is also reported as a `security_event` span so
//! blocks and evictions can be audited independently of debug logging.

use opentelemetry::KeyValue;
use tracing::{info_span, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Security event names.
pub mod events {
    pub const HOST_BLOCKED: &str = "host_blocked";
    pub const HOST_EVICTED: &str = "host_evicted";
    pub const HOST_ALREADY_BLOCKED: &str = "host_already_blocked";
    pub const SEGMENT_UNRESOLVED: &str = "segment_unresolved";
    pub const ROTATION_FAILED: &str = "rotation_failed";
}

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
    /// A second call is a no-op.
    pub fn init(default_filter: &str) {
        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(default_filter)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init();
    }

    #[inline]
    pub async fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "security_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        async {
            tracing::info!(
                metadata = ?metadata,
                "Security event occurred"
            );
        }
        .instrument(span)
        .await
    }
}
