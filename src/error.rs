//! Error types for device sessions and protocol layers.
//!
//! All fallible operations in this crate return [`DeviceError`]. The error carries
//! enough structure for callers to decide whether a failure is environmental (bus
//! busy, unit unplugged, a coldstart that never synchronized) or a programming
//! mistake such as transmitting on a closed device.
//!
//! ## Error Categories
//!
//! - **NotFound**: no matching device, controller or extension
//! - **Connection**: the transport could not be opened or failed while open
//! - **Configuration**: invalid or incomplete FlexRay/device settings
//! - **Timeout**: go-online, FlexRay listen timeout, caller-side request waits
//! - **TransmitFailure**: bus busy, device not online, buffer not configured
//! - **Contract**: caller misuse, e.g. configuring a controller on an online device
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use vnetlink::DeviceError;
//!
//! let error = DeviceError::connection_failed("unit is owned by another process");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::livedata::{LiveDataHandle, LiveDataStatus};

/// Result type alias for device operations.
pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

/// Coarse classification of a [`DeviceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Connection,
    Configuration,
    Timeout,
    TransmitFailure,
    ProtocolCorrelation,
    Contract,
    Decode,
    Conflict,
    Unsupported,
    Rejected,
    Closed,
}

/// Main error type for device and protocol operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Transmit failed: {reason}")]
    TransmitFailure { reason: String },

    #[error("No outstanding LiveData request for handle {handle}")]
    Correlation { handle: LiveDataHandle },

    #[error("Contract violation in {operation}: {reason}")]
    Contract { operation: String, reason: String },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Settings changed on the device: expected revision {expected}, found {actual}")]
    SettingsConflict { expected: u32, actual: u32 },

    #[error("{feature} is not supported by this device")]
    Unsupported { feature: String },

    #[error("LiveData request {handle} rejected: {status}")]
    LiveDataRejected { handle: LiveDataHandle, status: LiveDataStatus },

    #[error("Device session is closed")]
    Closed,
}

impl DeviceError {
    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::NotFound { .. } => ErrorKind::NotFound,
            DeviceError::Connection { .. } => ErrorKind::Connection,
            DeviceError::Configuration { .. } => ErrorKind::Configuration,
            DeviceError::Timeout { .. } => ErrorKind::Timeout,
            DeviceError::TransmitFailure { .. } => ErrorKind::TransmitFailure,
            DeviceError::Correlation { .. } => ErrorKind::ProtocolCorrelation,
            DeviceError::Contract { .. } => ErrorKind::Contract,
            DeviceError::Decode { .. } => ErrorKind::Decode,
            DeviceError::SettingsConflict { .. } => ErrorKind::Conflict,
            DeviceError::Unsupported { .. } => ErrorKind::Unsupported,
            DeviceError::LiveDataRejected { .. } => ErrorKind::Rejected,
            DeviceError::Closed => ErrorKind::Closed,
        }
    }

    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeviceError::Connection { .. } => true,
            DeviceError::Timeout { .. } => true,
            DeviceError::TransmitFailure { .. } => true,
            DeviceError::SettingsConflict { .. } => true,
            DeviceError::LiveDataRejected { .. } => true,
            DeviceError::NotFound { .. } => false,
            DeviceError::Configuration { .. } => false,
            DeviceError::Correlation { .. } => false,
            DeviceError::Contract { .. } => false,
            DeviceError::Decode { .. } => false,
            DeviceError::Unsupported { .. } => false,
            DeviceError::Closed => false,
        }
    }

    /// Caller misuse rather than an environmental failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, DeviceError::Contract { .. } | DeviceError::Closed)
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DeviceError::NotFound { .. } => vec![
                "Check that the unit is connected and powered",
                "Verify the serial number",
                "Re-run device discovery",
            ],
            DeviceError::Connection { .. } => vec![
                "Close other applications that may own the unit",
                "Reconnect the unit",
                "Retry the open",
            ],
            DeviceError::Configuration { .. } => vec![
                "Validate the cluster timing parameters",
                "Check key slot assignments for the cluster",
                "Configure every controller that starts when going online",
            ],
            DeviceError::Timeout { .. } => vec![
                "Check bus termination and wiring",
                "Verify that a coldstart node is present on the cluster",
                "Verify that every node uses the same cluster configuration",
                "Increase the timeout",
            ],
            DeviceError::TransmitFailure { .. } => vec![
                "Retry the transmit",
                "Check that the device is online",
                "Check that a message buffer exists for the FlexRay slot",
            ],
            DeviceError::Correlation { .. } => vec!["Ignore late messages for retired handles"],
            DeviceError::Contract { .. } => vec![
                "Open the device before using it",
                "Configure controllers before going online",
            ],
            DeviceError::Decode { .. } => {
                vec!["Check transport framing", "Verify firmware compatibility"]
            }
            DeviceError::SettingsConflict { .. } => {
                vec!["Refresh the settings snapshot", "Reapply the change on the new snapshot"]
            }
            DeviceError::Unsupported { .. } => vec!["Use a device that supports the feature"],
            DeviceError::LiveDataRejected { .. } => vec![
                "Use a fresh handle",
                "Reduce the number of signals per request",
                "Unsubscribe unused handles",
            ],
            DeviceError::Closed => vec!["Open the device again"],
        }
    }

    /// Helper constructor for lookup failures.
    pub fn not_found(what: impl Into<String>) -> Self {
        DeviceError::NotFound { what: what.into() }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        DeviceError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        DeviceError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(reason: impl Into<String>) -> Self {
        DeviceError::Configuration { reason: reason.into() }
    }

    /// Helper constructor for timeouts.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        DeviceError::Timeout { operation: operation.into(), duration }
    }

    /// Helper constructor for transmit failures.
    pub fn transmit_failed(reason: impl Into<String>) -> Self {
        DeviceError::TransmitFailure { reason: reason.into() }
    }

    /// Helper constructor for caller contract violations.
    pub fn contract(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::Contract { operation: operation.into(), reason: reason.into() }
    }

    /// Helper constructor for decode errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        DeviceError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for unsupported features.
    pub fn unsupported(feature: impl Into<String>) -> Self {
        DeviceError::Unsupported { feature: feature.into() }
    }
}

impl From<serde_yaml_ng::Error> for DeviceError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        DeviceError::Configuration { reason: format!("YAML: {}", err) }
    }
}
