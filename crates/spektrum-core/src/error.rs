//! Scan engine error types

use thiserror::Error;

/// Result type for scan engine operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while configuring or running a sweep
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// The requested frequency range cannot be solved into a tuning plan
    #[error("Invalid frequency range {lower}..{upper} Hz (step {step} Hz): {reason}")]
    InvalidRange {
        lower: u64,
        upper: u64,
        step: u64,
        reason: String,
    },

    /// Device open or configuration failure reported by the driver
    #[error("Device error: {0}")]
    Device(String),

    /// Acquisition of a single segment failed; the next segment may succeed
    #[error("Acquisition failed for segment {segment}: {reason}")]
    Acquisition { segment: usize, reason: String },

    /// The device is gone or unusable; scanning cannot continue
    #[error("Fatal device error: {0}")]
    DeviceLost(String),

    /// An operation needs a tuning plan but none is configured
    #[error("No frequency range configured")]
    NotConfigured,

    /// An operation needs an open device but none is open
    #[error("No device open")]
    NoDevice,

    /// Too many back-to-back segment failures
    #[error("Scan aborted after {0} consecutive segment failures")]
    TooManyFailures(usize),

    /// The scan thread could not be spawned
    #[error("Failed to spawn scan thread: {0}")]
    ThreadSpawn(String),

    /// Configuration file or value problem
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScanError {
    /// Check if the scan loop may skip the failing segment and continue
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ScanError::Acquisition { .. })
    }

    /// Check if this error must terminate the scan loop
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Shorthand for building an acquisition error
    pub fn acquisition(segment: usize, reason: impl Into<String>) -> Self {
        ScanError::Acquisition {
            segment,
            reason: reason.into(),
        }
    }
}
