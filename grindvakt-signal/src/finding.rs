//! ## grindvakt-signal::finding
//! Parser for threat-detection findings delivered as JSON events.
//!
//! Two finding shapes carry the offending host in different places:
//! - unsolicited inbound port probes (`Recon:EC2/PortProbeUnprotectedPort`)
//! - every other finding, which reports a network connection to or from a
//!   flagged host
//!
//! Both normalize into the same [`Signal`].

use std::net::Ipv4Addr;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use grindvakt_core::SubnetId;

/// Finding type of an unsolicited inbound probe.
pub const PORT_PROBE_FINDING: &str = "Recon:EC2/PortProbeUnprotectedPort";

const FINDING_TYPE: &str = "/detail/type";
const SUBNET_ID: &str = "/detail/resource/instanceDetails/networkInterfaces/0/subnetId";
const INSTANCE_ID: &str = "/detail/resource/instanceDetails/instanceId";
const PROBE_REMOTE_IP: &str =
    "/detail/service/action/portProbeAction/portProbeDetails/0/remoteIpDetails/ipAddressV4";
const CONNECTION_REMOTE_IP: &str =
    "/detail/service/action/networkConnectionAction/remoteIpDetails/ipAddressV4";

/// Errors that can occur while normalizing a finding.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SignalError {
    #[error("Finding is missing {0}")]
    MissingField(&'static str),
    #[error("Finding field {0} is not a string")]
    NotAString(&'static str),
    #[error("Finding field {field} holds an invalid IPv4 address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("Finding is not valid JSON: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SignalType {
    /// Unsolicited inbound probe of an exposed port.
    PortProbe,
    /// Connection between a protected instance and a flagged host.
    OutboundConnection { finding_type: String },
}

/// A normalized "block this host on this segment" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signal {
    pub subnet_id: SubnetId,
    pub remote_host: Ipv4Addr,
    /// The protected resource the finding was raised for.
    pub subject_id: String,
    pub signal_type: SignalType,
}

#[derive(Default, Debug, Copy, Clone)]
pub struct FindingParser;

impl FindingParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_slice(&self, input: &[u8]) -> Result<Signal, SignalError> {
        let event: Value =
            serde_json::from_slice(input).map_err(|e| SignalError::Json(e.to_string()))?;
        self.parse(&event)
    }

    pub fn parse(&self, event: &Value) -> Result<Signal, SignalError> {
        let finding_type = text(event, FINDING_TYPE)?;
        let (signal_type, host_field) = if finding_type == PORT_PROBE_FINDING {
            (SignalType::PortProbe, PROBE_REMOTE_IP)
        } else {
            (
                SignalType::OutboundConnection {
                    finding_type: finding_type.to_string(),
                },
                CONNECTION_REMOTE_IP,
            )
        };

        let raw_host = text(event, host_field)?;
        let remote_host = raw_host
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| SignalError::InvalidAddress {
                field: host_field,
                value: raw_host.to_string(),
            })?;

        Ok(Signal {
            subnet_id: SubnetId::from(text(event, SUBNET_ID)?),
            remote_host,
            subject_id: text(event, INSTANCE_ID)?.to_string(),
            signal_type,
        })
    }
}

fn text<'a>(event: &'a Value, pointer: &'static str) -> Result<&'a str, SignalError> {
    event
        .pointer(pointer)
        .ok_or(SignalError::MissingField(pointer))?
        .as_str()
        .ok_or(SignalError::NotAString(pointer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe_event() -> Value {
        json!({
            "detail": {
                "type": "Recon:EC2/PortProbeUnprotectedPort",
                "resource": {
                    "instanceDetails": {
                        "instanceId": "i-0abc",
                        "networkInterfaces": [{ "subnetId": "subnet-01" }]
                    }
                },
                "service": {
                    "action": {
                        "portProbeAction": {
                            "portProbeDetails": [
                                { "remoteIpDetails": { "ipAddressV4": "198.51.100.7" } }
                            ]
                        }
                    }
                }
            }
        })
    }

    fn connection_event(finding_type: &str, ip: &str) -> Value {
        json!({
            "detail": {
                "type": finding_type,
                "resource": {
                    "instanceDetails": {
                        "instanceId": "i-0def",
                        "networkInterfaces": [{ "subnetId": "subnet-02" }]
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

    #[test]
    fn parses_port_probe() {
        let signal = FindingParser::new().parse(&probe_event()).unwrap();
        assert_eq!(signal.signal_type, SignalType::PortProbe);
        assert_eq!(signal.subnet_id, SubnetId::from("subnet-01"));
        assert_eq!(signal.remote_host, Ipv4Addr::new(198, 51, 100, 7));
        assert_eq!(signal.subject_id, "i-0abc");
    }

    #[test]
    fn parses_connection_findings() {
        let event = connection_event("UnauthorizedAccess:EC2/TorClient", "203.0.113.9");
        let signal = FindingParser::new().parse(&event).unwrap();
        assert_eq!(
            signal.signal_type,
            SignalType::OutboundConnection {
                finding_type: "UnauthorizedAccess:EC2/TorClient".into()
            }
        );
        assert_eq!(signal.subnet_id, SubnetId::from("subnet-02"));
        assert_eq!(signal.remote_host, Ipv4Addr::new(203, 0, 113, 9));
    }

    #[test]
    fn both_shapes_normalize_to_the_same_pair() {
        let mut probe = probe_event();
        probe["detail"]["resource"]["instanceDetails"]["networkInterfaces"][0]["subnetId"] =
            json!("subnet-02");
        probe["detail"]["service"]["action"]["portProbeAction"]["portProbeDetails"][0]
            ["remoteIpDetails"]["ipAddressV4"] = json!("203.0.113.9");
        let connection = connection_event("Backdoor:EC2/C&CActivity.B", "203.0.113.9");

        let parser = FindingParser::new();
        let a = parser.parse(&probe).unwrap();
        let b = parser.parse(&connection).unwrap();
        assert_eq!((a.subnet_id, a.remote_host), (b.subnet_id, b.remote_host));
    }

    #[test]
    fn reports_missing_host() {
        let mut event = probe_event();
        event["detail"]["service"]["action"]["portProbeAction"]["portProbeDetails"] = json!([]);
        assert_eq!(
            FindingParser::new().parse(&event),
            Err(SignalError::MissingField(PROBE_REMOTE_IP))
        );
    }

    #[test]
    fn rejects_bad_address() {
        let event = connection_event("Recon:EC2/Portscan", "not-an-ip");
        assert!(matches!(
            FindingParser::new().parse(&event),
            Err(SignalError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            FindingParser::new().parse_slice(b"{"),
            Err(SignalError::Json(_))
        ));
    }
}
