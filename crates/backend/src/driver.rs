//! Vendor driver service contract
//!
//! The driver service is an opaque collaborator: a connection obtained once
//! per epoch through which devices are enumerated, descriptors fetched and
//! configurations/interfaces controlled. Every call is synchronous and
//! reports failure with the platform error code.

use api::{ConfigSelector, DEVICE_DESCRIPTOR_LENGTH};
use thiserror::Error;

/// Platform error codes the backend distinguishes
pub mod codes {
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_HANDLE: u32 = 6;
    pub const ERROR_GEN_FAILURE: u32 = 31;
    pub const ERROR_NOT_SUPPORTED: u32 = 50;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_SEM_TIMEOUT: u32 = 121;
    pub const ERROR_BUSY: u32 = 170;
    pub const ERROR_DEVICE_NOT_CONNECTED: u32 = 1167;
    pub const ERROR_NOT_FOUND: u32 = 1168;
}

/// Failed driver call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("driver error code {code}")]
pub struct DriverError {
    /// Platform error code
    pub code: u32,
}

impl DriverError {
    pub const fn new(code: u32) -> Self {
        Self { code }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// How the driver identifies a device across scans
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// Numeric session id assigned by the driver
    Id(u64),
    /// Stable location string (e.g. a port path); interned into a session id
    Path(String),
}

/// Location and identity of a driver device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverAddress {
    pub bus_number: u8,
    pub device_address: u8,
    pub session: SessionKey,
}

/// Connection to the vendor USB driver
///
/// Dropping a `Device` value releases the driver's reference to it.
pub trait DriverService: Send + Sync + 'static {
    /// Driver-side device reference
    type Device: Send + Sync + 'static;

    /// Currently attached devices (at most `max_devices`)
    fn device_list(&self, max_devices: usize) -> DriverResult<Vec<Self::Device>>;

    fn device_address(&self, device: &Self::Device) -> DriverResult<DriverAddress>;

    /// Raw 18-byte device descriptor
    fn device_descriptor(
        &self,
        device: &Self::Device,
    ) -> DriverResult<[u8; DEVICE_DESCRIPTOR_LENGTH]>;

    /// Copy a configuration descriptor into `buffer`, returning its length
    fn config_descriptor(
        &self,
        device: &Self::Device,
        selector: ConfigSelector,
        buffer: &mut [u8],
    ) -> DriverResult<usize>;

    fn get_config(&self, device: &Self::Device) -> DriverResult<u8>;

    fn set_config(&self, device: &Self::Device, value: u8) -> DriverResult<()>;

    fn claim_interface(&self, device: &Self::Device, interface_number: u8) -> DriverResult<()>;

    fn release_interface(&self, device: &Self::Device, interface_number: u8) -> DriverResult<()>;

    fn set_interface_alt_setting(
        &self,
        device: &Self::Device,
        interface_number: u8,
        alt_setting: u8,
    ) -> DriverResult<()>;

    fn clear_halt(&self, device: &Self::Device, endpoint: u8) -> DriverResult<()>;

    /// Close the connection
    fn close(&self);
}
