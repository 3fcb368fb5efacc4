use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Failure reported by a digitizer backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} failed: {reason}")]
pub struct DeviceError {
    pub operation: &'static str,
    pub reason: String,
}

impl DeviceError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DaqError {
    #[error(
        "Not enough free space: {free_space_mb:.2} MB free, {safety_margin_mb:.0} MB must stay free"
    )]
    InsufficientStorage {
        free_space_mb: f64,
        safety_margin_mb: f64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Storage write error: {0}")]
    Storage(#[from] hdf5::Error),

    #[error("Event {got} is out of order, last written event was {last}")]
    OutOfOrder { last: u64, got: u64 },

    #[error("No trigger within {0:?}")]
    TriggerTimeout(Duration),

    #[error("Acquisition cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] confique::Error),

    #[error("Clock error: {0}")]
    Clock(String),

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl DaqError {
    /// Errors raised before any hardware interaction.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            DaqError::InsufficientStorage { .. }
                | DaqError::InvalidConfiguration(_)
                | DaqError::Config(_)
                | DaqError::Clock(_)
        )
    }
}
