//! Maps a network segment onto the firewall rule set guarding it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use grindvakt_core::{RuleSetId, SubnetId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("No rule set is associated with {0}")]
    NotFound(SubnetId),
    #[error("Segment lookup failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SegmentResolver: Send + Sync {
    async fn resolve(&self, subnet_id: &SubnetId) -> Result<RuleSetId, ResolveError>;
}

/// Resolver backed by a fixed association table.
#[derive(Debug, Clone, Default)]
pub struct StaticSegmentResolver {
    associations: BTreeMap<SubnetId, RuleSetId>,
}

impl StaticSegmentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(associations: &BTreeMap<String, String>) -> Self {
        Self {
            associations: associations
                .iter()
                .map(|(subnet, acl)| (SubnetId::from(subnet.as_str()), RuleSetId::from(acl.as_str())))
                .collect(),
        }
    }

    pub fn associate(mut self, subnet_id: impl Into<SubnetId>, rule_set_id: impl Into<RuleSetId>) -> Self {
        self.associations.insert(subnet_id.into(), rule_set_id.into());
        self
    }

    pub fn len(&self) -> usize {
        self.associations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }
}

#[async_trait]
impl SegmentResolver for StaticSegmentResolver {
    async fn resolve(&self, subnet_id: &SubnetId) -> Result<RuleSetId, ResolveError> {
        self.associations
            .get(subnet_id)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(subnet_id.clone()))
    }
}
