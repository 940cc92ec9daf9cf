use thiserror::Error;

use grindvakt_core::RotationError;
use grindvakt_signal::SignalError;

/// Failure of one signal handling invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Malformed finding: {0}")]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Rotation(#[from] RotationError),
}

impl HandlerError {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Signal(_) => "malformed_finding",
            HandlerError::Rotation(err) => err.kind(),
        }
    }
}
