//! Network segment associations.
//!
//! Maps the subnet named by a threat signal to the firewall rule set guarding it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone)]
pub struct SegmentConfig {
    /// Subnet id to rule-set id.
    #[validate(custom(function = validation::validate_associations))]
    #[serde(default)]
    pub associations: BTreeMap<String, String>,
}
