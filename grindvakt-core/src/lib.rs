//! # grindvakt-core
//!
//! Foundation layer shared by every Grindvakt crate: the rule-slot data model,
//! the error taxonomy, and the store seams the rotation engine drives.
//!
//! ### Key Submodules:
//! - `rule`: rule sets, slot ranges, rule records, deny entries
//! - `store`: `MetadataStore` and `FirewallRuleStore` traits
//! - `error`: `RotationError` and the leaf `StoreError`
//! - `time`: wall clock and a manually driven clock for tests
//! - `persist`: atomically rewritten JSON documents for file-backed stores
//! - `fault`: scripted failures for in-memory stores

pub mod error;
pub mod fault;
pub mod persist;
pub mod rule;
pub mod store;
pub mod time;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::rule::*;
    pub use crate::store::*;
    pub use crate::time::*;
}

pub use error::{RotationError, StoreError, StoreKind};
pub use rule::{DenyEntry, Outcome, RuleRecord, RuleSetId, SlotRange, SubnetId};
pub use store::{FirewallRuleStore, LeaseToken, MetadataStore, Revision, RuleSetSnapshot};
pub use time::{Clock, ManualClock, SystemClock};
