//! Cross-store consistency check for one rule set.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use grindvakt_core::{DenyEntry, RuleRecord, RuleSetId, SlotRange};

/// One disagreement between the metadata table and the firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    /// A record whose slot holds no deny entry.
    MissingEntry { slot: u16, host: Ipv4Addr },
    /// A deny entry inside the managed range with no record.
    UntrackedEntry { slot: u16, host: Ipv4Addr },
    HostMismatch {
        slot: u16,
        recorded: Ipv4Addr,
        installed: Ipv4Addr,
    },
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::MissingEntry { slot, host } => {
                write!(f, "slot {slot}: {host} recorded but not installed")
            }
            Drift::UntrackedEntry { slot, host } => {
                write!(f, "slot {slot}: {host} installed but not recorded")
            }
            Drift::HostMismatch {
                slot,
                recorded,
                installed,
            } => write!(f, "slot {slot}: recorded {recorded}, installed {installed}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub rule_set_id: RuleSetId,
    pub records: usize,
    pub entries_in_range: usize,
    pub drift: Vec<Drift>,
}

impl AuditReport {
    /// Compares records with the deny entries inside `slots`, slot by slot.
    pub fn compare(
        rule_set_id: &RuleSetId,
        slots: SlotRange,
        records: &[RuleRecord],
        entries: &[DenyEntry],
    ) -> Self {
        let recorded: BTreeMap<u16, Ipv4Addr> = records
            .iter()
            .map(|r| (r.slot_number, r.remote_host))
            .collect();
        let installed: BTreeMap<u16, Ipv4Addr> = entries
            .iter()
            .filter(|e| slots.contains(e.rule_number))
            .map(|e| (e.rule_number, e.host()))
            .collect();

        let mut drift = Vec::new();
        for slot in slots.iter() {
            match (recorded.get(&slot), installed.get(&slot)) {
                (Some(&host), None) => drift.push(Drift::MissingEntry { slot, host }),
                (None, Some(&host)) => drift.push(Drift::UntrackedEntry { slot, host }),
                (Some(&want), Some(&got)) if want != got => drift.push(Drift::HostMismatch {
                    slot,
                    recorded: want,
                    installed: got,
                }),
                _ => {}
            }
        }

        Self {
            rule_set_id: rule_set_id.clone(),
            records: records.len(),
            entries_in_range: installed.len(),
            drift,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty()
    }

    pub fn describe_drift(&self) -> String {
        self.drift
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
