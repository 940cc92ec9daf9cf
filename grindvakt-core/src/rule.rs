//! Rule-slot data model.
//!
//! A rule set owns a fixed window of rule numbers (`SlotRange`). Every blocked
//! host occupies one slot, described twice: as a [`DenyEntry`] in the live
//! firewall rule set and as a [`RuleRecord`] in the metadata store.

use std::fmt;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RotationError;

/// Highest rule number a firewall rule set accepts.
pub const MAX_RULE_NUMBER: u16 = 32766;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a firewall rule set (the metadata partition key).
    RuleSetId
);

string_id!(
    /// Identifier of a network segment (subnet) named by a threat signal.
    SubnetId
);

/// The window of rule numbers managed inside one rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    base: u16,
    capacity: u16,
}

impl SlotRange {
    pub const DEFAULT_BASE: u16 = 71;
    pub const DEFAULT_CAPACITY: u16 = 10;

    pub fn new(base: u16, capacity: u16) -> Result<Self, RotationError> {
        let fits = base >= 1
            && capacity >= 1
            && u32::from(base) + u32::from(capacity) - 1 <= u32::from(MAX_RULE_NUMBER);
        if !fits {
            return Err(RotationError::InvalidSlotRange { base, capacity });
        }
        Ok(Self { base, capacity })
    }

    #[inline]
    pub fn base(&self) -> u16 {
        self.base
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        usize::from(self.capacity)
    }

    /// Last slot of the window; reaching it switches allocation to eviction.
    #[inline]
    pub fn ceiling(&self) -> u16 {
        self.base + self.capacity - 1
    }

    #[inline]
    pub fn contains(&self, slot: u16) -> bool {
        (self.base..=self.ceiling()).contains(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.base..=self.ceiling()
    }
}

impl Default for SlotRange {
    fn default() -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            capacity: Self::DEFAULT_CAPACITY,
        }
    }
}

/// Durable description of one occupied slot.
///
/// Wire layout: `rule_set_id`, `created_at` (seconds since epoch), `host_ip`
/// and `rule_no`, the latter written as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub rule_set_id: RuleSetId,
    pub created_at: i64,
    #[serde(rename = "host_ip")]
    pub remote_host: Ipv4Addr,
    #[serde(
        rename = "rule_no",
        serialize_with = "serialize_slot",
        deserialize_with = "deserialize_slot"
    )]
    pub slot_number: u16,
}

impl RuleRecord {
    pub fn new(
        rule_set_id: RuleSetId,
        created_at: i64,
        remote_host: Ipv4Addr,
        slot_number: u16,
    ) -> Self {
        Self {
            rule_set_id,
            created_at,
            remote_host,
            slot_number,
        }
    }
}

fn serialize_slot<S>(slot: &u16, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(slot)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SlotValue {
    Num(u16),
    Str(String),
}

/// Accepts the textual form written by [`serialize_slot`] and plain integers.
fn deserialize_slot<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match SlotValue::deserialize(deserializer)? {
        SlotValue::Num(n) => Ok(n),
        SlotValue::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Protocol selector of a deny entry. Grindvakt only installs all-protocol blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "-1")]
    All,
}

impl Protocol {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Protocol::All => "-1",
        }
    }
}

/// Inclusive port range of a deny entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub const FULL: PortRange = PortRange { from: 0, to: 65535 };
}

/// A live inbound deny entry in a firewall rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyEntry {
    pub rule_number: u16,
    pub cidr_block: Ipv4Network,
    pub protocol: Protocol,
    pub port_range: PortRange,
    pub egress: bool,
}

impl DenyEntry {
    /// Inbound, all-protocol, full-port-range block of a single host.
    pub fn block_host(rule_number: u16, host: Ipv4Addr) -> Self {
        Self {
            rule_number,
            cidr_block: Ipv4Network::from(host),
            protocol: Protocol::All,
            port_range: PortRange::FULL,
            egress: false,
        }
    }

    #[inline]
    pub fn host(&self) -> Ipv4Addr {
        self.cidr_block.ip()
    }
}

/// Result of a successful allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The host now occupies `slot`; `evicted` is the record whose slot was reused.
    Blocked {
        slot: u16,
        evicted: Option<RuleRecord>,
    },
    /// The host already holds a slot in this rule set; nothing changed.
    AlreadyBlocked,
}

impl Outcome {
    pub fn slot(&self) -> Option<u16> {
        match self {
            Outcome::Blocked { slot, .. } => Some(*slot),
            Outcome::AlreadyBlocked => None,
        }
    }
}
