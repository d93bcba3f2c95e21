//! Backend error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a failed backend operation
///
/// This is the fixed set of error codes a backend reports to the USB
/// library. Platform error codes are translated into one of these before
/// they leave the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum UsbError {
    /// Input/output error
    #[error("Input/output error")]
    Io,

    /// Invalid parameter
    #[error("Invalid parameter")]
    InvalidParam,

    /// Entity not found
    #[error("Entity not found")]
    NotFound,

    /// Operation not supported on this platform
    ///
    /// Distinguishes "not implemented here" from "attempted and failed".
    #[error("Operation not supported on this platform")]
    NotSupported,

    /// Insufficient memory or other resource exhaustion
    #[error("Insufficient memory")]
    NoMem,

    /// Other error
    #[error("Other error")]
    Other,
}

impl UsbError {
    /// Numeric code as used by the libusb C API
    pub fn code(self) -> i32 {
        match self {
            UsbError::Io => -1,
            UsbError::InvalidParam => -2,
            UsbError::NotFound => -5,
            UsbError::NoMem => -11,
            UsbError::NotSupported => -12,
            UsbError::Other => -99,
        }
    }
}

/// Type alias for backend results
pub type Result<T> = std::result::Result<T, UsbError>;
