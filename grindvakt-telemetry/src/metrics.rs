//! ## grindvakt-telemetry::metrics
//! **Prometheus counters and latency histogram for rule rotation**

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub signals: Counter,
    pub blocks: Counter,
    pub evictions: Counter,
    pub already_blocked: Counter,
    pub unresolved: Counter,
    pub failures: Counter,
    pub conflicts: Counter,
    pub allocation_latency: Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::try_new().expect("static metric definitions are valid")
    }

    fn try_new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<Counter, prometheus::Error> {
            let counter = Counter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let signals = counter("grindvakt_signals_total", "Threat signals handled")?;
        let blocks = counter("grindvakt_blocks_total", "Hosts allocated a deny slot")?;
        let evictions = counter(
            "grindvakt_evictions_total",
            "Deny slots reused by evicting the oldest host",
        )?;
        let already_blocked = counter(
            "grindvakt_already_blocked_total",
            "Signals for hosts that already hold a slot",
        )?;
        let unresolved = counter(
            "grindvakt_unresolved_total",
            "Signals whose segment maps to no rule set",
        )?;
        let failures = counter("grindvakt_failures_total", "Failed rotation attempts")?;
        let conflicts = counter(
            "grindvakt_conflicts_total",
            "Allocation attempts lost to a concurrent writer",
        )?;

        let allocation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "grindvakt_allocation_latency_seconds",
                "End-to-end rule allocation time",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(allocation_latency.clone()))?;

        Ok(Self {
            registry,
            signals,
            blocks,
            evictions,
            already_blocked,
            unresolved,
            failures,
            conflicts,
            allocation_latency,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
