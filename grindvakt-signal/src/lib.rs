//! # Grindvakt Signals
//!
//! Normalizes threat findings into block requests and maps the network
//! segment they name onto a firewall rule set.

pub mod finding;
pub mod resolver;

pub use finding::{FindingParser, Signal, SignalError, SignalType};
pub use resolver::{ResolveError, SegmentResolver, StaticSegmentResolver};
