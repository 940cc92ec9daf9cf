//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

lazy_static! {
    static ref TABLE_NAME: Regex = Regex::new("^[A-Za-z0-9_.-]{3,255}$").unwrap();
    static ref RESOURCE_ID: Regex = Regex::new("^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$").unwrap();
}

/// Validate a metadata table name (`[A-Za-z0-9_.-]`, 3 to 255 characters).
pub fn validate_table_name(name: &str) -> Result<(), ValidationError> {
    if TABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_table_name"))
    }
}

/// Validate that every subnet and rule-set id looks like a resource identifier.
pub fn validate_associations(map: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if map
        .iter()
        .all(|(subnet, rule_set)| RESOURCE_ID.is_match(subnet) && RESOURCE_ID.is_match(rule_set))
    {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_segment_association"))
    }
}

/// Validate a log filter level.
pub fn validate_log_filter(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"]
        .contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_filter"))
    }
}
