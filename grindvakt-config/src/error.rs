//! Error types for configuration loading and validation

use std::path::PathBuf;

use grindvakt_core::RotationError;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Unified configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found error.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Configuration validation error.
    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Validation(#[source] ValidationErrors),

    /// Slot window does not fit the firewall's rule numbers.
    #[error("Invalid rotation window: {0}")]
    SlotRange(#[from] RotationError),

    /// Figment parsing error.
    #[error("Configuration parsing error: {0}")]
    Parsing(#[from] figment::Error),
}

/// One `section.field: message` line per failed check, ordered by path.
fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut lines = Vec::new();
    collect_failures("", errors, &mut lines);
    lines.sort();
    lines.join("\n")
}

fn collect_failures(prefix: &str, errors: &ValidationErrors, lines: &mut Vec<String>) {
    for (name, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        match kind {
            ValidationErrorsKind::Field(failures) => {
                lines.extend(failures.iter().map(|failure| {
                    let message = failure.message.as_deref().unwrap_or(failure.code.as_ref());
                    format!("{path}: {message}")
                }));
            }
            ValidationErrorsKind::Struct(inner) => collect_failures(&path, inner, lines),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_failures(&format!("{path}[{index}]"), inner, lines);
                }
            }
        }
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}
