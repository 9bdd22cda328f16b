//! Capture error type reported through the delegate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while binding or configuring a capture device.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CaptureError {
    /// The requested device does not exist.
    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but cannot be opened right now.
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The platform refused access to the device.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The device was bound but could not be configured.
    #[error("Device configuration failed: {0}")]
    Configuration(String),
}
