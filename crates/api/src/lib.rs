//! Platform backend contract for ceusb
//!
//! This crate defines the operation table a platform backend implements so
//! that a generic USB-access library can enumerate and control devices on it.
//! It provides the shared result/error type, timestamps and clock ids,
//! session ids, raw device descriptors and the library-side device registry.
//!
//! # Example
//!
//! ```
//! use api::{ClockId, Timestamp, UsbError};
//!
//! assert_eq!(ClockId::try_from(0), Ok(ClockId::Monotonic));
//! assert_eq!(ClockId::try_from(7), Err(UsbError::InvalidParam));
//!
//! let ts = Timestamp::new(2, 500);
//! assert!(ts > Timestamp::new(1, 999_999_999));
//! ```

pub mod backend;
pub mod error;
pub mod registry;
pub mod types;

pub use backend::OsBackend;
pub use error::{Result, UsbError};
pub use registry::DeviceRegistry;
pub use types::{
    ClockId, ConfigSelector, DEVICE_DESCRIPTOR_LENGTH, DeviceAddress, DeviceDescriptor,
    SessionId, Timestamp, Transfer, TransferKind,
};
