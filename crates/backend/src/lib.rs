//! Windows CE style USB backend for ceusb
//!
//! [`CeBackend`] implements [`api::OsBackend`] over a vendor driver service.
//! The platform-specific pieces (driver connection, performance counter,
//! worker threads) come from a [`Platform`]; everything else is shared:
//!
//! - [`epoch`]: the driver, clock service and session table owned by one
//!   init/exit epoch
//! - [`device`]: device records, handles and descriptor checks
//! - [`driver`]: the driver service contract and its error codes
//! - [`test_utils`]: mock driver and platform with failure injection

pub mod backend;
pub mod device;
pub mod driver;
pub mod epoch;
pub mod platform;
pub mod test_utils;

pub use backend::{BACKEND_NAME, CeBackend, GATE_PREFIX};
pub use device::{CeDevice, CeDeviceHandle, USB_MAXCONFIG, sanitize_descriptor};
pub use driver::{DriverAddress, DriverError, DriverResult, DriverService, SessionKey, codes};
pub use epoch::{Epoch, EpochError};
pub use platform::Platform;
