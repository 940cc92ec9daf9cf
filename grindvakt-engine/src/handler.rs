//! Entry point for threat findings: parse, resolve the segment, allocate.

use std::net::Ipv4Addr;
use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use grindvakt_core::{Outcome, RotationError, RuleSetId, SubnetId};
use grindvakt_signal::{FindingParser, ResolveError, SegmentResolver, Signal};
use grindvakt_telemetry::logging::events;
use grindvakt_telemetry::EventLogger;

use crate::error::HandlerError;
use crate::rotation::RuleRotationEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandleOutcome {
    Blocked {
        rule_set_id: RuleSetId,
        host: Ipv4Addr,
        slot: u16,
        evicted: Option<Ipv4Addr>,
    },
    AlreadyBlocked {
        rule_set_id: RuleSetId,
        host: Ipv4Addr,
    },
    /// No rule set guards the segment; nothing was changed.
    Unresolved { subnet_id: SubnetId },
}

pub struct SignalHandler {
    parser: FindingParser,
    resolver: Arc<dyn SegmentResolver>,
    engine: Arc<RuleRotationEngine>,
}

impl SignalHandler {
    pub fn new(resolver: Arc<dyn SegmentResolver>, engine: Arc<RuleRotationEngine>) -> Self {
        Self {
            parser: FindingParser::new(),
            resolver,
            engine,
        }
    }

    pub fn engine(&self) -> &RuleRotationEngine {
        &self.engine
    }

    #[instrument(level = "info", skip_all)]
    pub async fn handle(&self, event: &Value) -> Result<HandleOutcome, HandlerError> {
        self.engine.metrics().signals.inc();
        debug!(%event, "Received finding");

        let signal = self.parser.parse(event).map_err(|err| {
            self.engine.metrics().failures.inc();
            error!(error = %err, "Malformed finding");
            err
        })?;
        self.handle_signal(&signal).await
    }

    #[instrument(
        level = "info",
        skip_all,
        fields(subnet_id = %signal.subnet_id, host = %signal.remote_host, subject = %signal.subject_id)
    )]
    pub async fn handle_signal(&self, signal: &Signal) -> Result<HandleOutcome, HandlerError> {
        let rule_set_id = match self.resolver.resolve(&signal.subnet_id).await {
            Ok(rule_set_id) => rule_set_id,
            Err(ResolveError::NotFound(subnet_id)) => {
                self.engine.metrics().unresolved.inc();
                warn!("Segment has no associated rule set");
                EventLogger::log_event(
                    events::SEGMENT_UNRESOLVED,
                    vec![
                        KeyValue::new("subnet_id", subnet_id.to_string()),
                        KeyValue::new("host", signal.remote_host.to_string()),
                    ],
                )
                .await;
                return Ok(HandleOutcome::Unresolved { subnet_id });
            }
            Err(ResolveError::Backend(detail)) => {
                self.engine.metrics().failures.inc();
                error!(%detail, "Segment lookup failed");
                return Err(RotationError::SegmentResolutionFailed {
                    subnet_id: signal.subnet_id.clone(),
                }
                .into());
            }
        };

        let host = signal.remote_host;
        let outcome = match self.engine.allocate(&rule_set_id, host).await? {
            Outcome::Blocked { slot, evicted } => HandleOutcome::Blocked {
                rule_set_id,
                host,
                slot,
                evicted: evicted.map(|r| r.remote_host),
            },
            Outcome::AlreadyBlocked => HandleOutcome::AlreadyBlocked { rule_set_id, host },
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use grindvakt_metadata::MemoryMetadataStore;
    use grindvakt_prevention::firewall::MemoryFirewall;
    use grindvakt_signal::StaticSegmentResolver;
    use serde_json::json;
    use tracing_test::traced_test;

    struct Unreachable;

    #[async_trait]
    impl SegmentResolver for Unreachable {
        async fn resolve(&self, _subnet_id: &SubnetId) -> Result<RuleSetId, ResolveError> {
            Err(ResolveError::Backend("connection refused".into()))
        }
    }

    fn finding(subnet: &str, ip: &str) -> Value {
        json!({
            "detail": {
                "type": "UnauthorizedAccess:EC2/SSHBruteForce",
                "resource": {
                    "instanceDetails": {
                        "instanceId": "i-0abc",
                        "networkInterfaces": [{ "subnetId": subnet }]
                    }
                },
                "service": {
                    "action": {
                        "networkConnectionAction": {
                            "remoteIpDetails": { "ipAddressV4": ip }
                        }
                    }
                }
            }
        })
    }

    fn handler(resolver: Arc<dyn SegmentResolver>) -> SignalHandler {
        let engine = RuleRotationEngine::new(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryFirewall::new()),
        );
        SignalHandler::new(resolver, Arc::new(engine))
    }

    fn resolver() -> Arc<dyn SegmentResolver> {
        Arc::new(StaticSegmentResolver::new().associate("subnet-01", "acl-1"))
    }

    #[tokio::test]
    async fn blocks_then_deduplicates() {
        let handler = handler(resolver());
        let event = finding("subnet-01", "203.0.113.9");

        let first = handler.handle(&event).await.unwrap();
        assert_eq!(
            first,
            HandleOutcome::Blocked {
                rule_set_id: RuleSetId::from("acl-1"),
                host: Ipv4Addr::new(203, 0, 113, 9),
                slot: 71,
                evicted: None
            }
        );
        let second = handler.handle(&event).await.unwrap();
        assert!(matches!(second, HandleOutcome::AlreadyBlocked { .. }));
        assert_eq!(handler.engine().metrics().signals.get() as u64, 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn unknown_segment_is_logged_not_failed() {
        let handler = handler(resolver());
        let outcome = handler
            .handle(&finding("subnet-99", "203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            HandleOutcome::Unresolved {
                subnet_id: SubnetId::from("subnet-99")
            }
        );
        assert!(logs_contain("Segment has no associated rule set"));
        assert!(handler
            .engine()
            .records(&RuleSetId::from("acl-1"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_is_surfaced() {
        let handler = handler(Arc::new(Unreachable));
        let err = handler
            .handle(&finding("subnet-01", "203.0.113.9"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "segment_resolution_failed");
    }

    #[tokio::test]
    async fn malformed_finding_is_rejected() {
        let handler = handler(resolver());
        let err = handler.handle(&json!({ "detail": {} })).await.unwrap_err();
        assert!(matches!(err, HandlerError::Signal(_)));
        assert_eq!(handler.engine().metrics().failures.get() as u64, 1);
    }
}
