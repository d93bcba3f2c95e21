//! Operation table implemented by platform backends
//!
//! Every entry is a capability the USB library relies on. A backend that
//! cannot provide one must return [`UsbError::NotSupported`] rather than
//! silently doing nothing, so callers can tell "not available on this
//! platform" apart from "attempted and failed".
//!
//! [`UsbError::NotSupported`]: crate::UsbError::NotSupported

use crate::error::Result;
use crate::registry::DeviceRegistry;
use crate::types::{ClockId, DeviceDescriptor, Timestamp, Transfer};
use std::sync::Arc;

/// Platform backend operation table
pub trait OsBackend: Send + Sync {
    /// Backend-private device object
    type Device: Send + Sync;
    /// Backend-private open device handle
    type Handle: Send + Sync;

    /// Human-readable backend name
    fn name(&self) -> &'static str;

    /// Acquire platform resources
    ///
    /// Calls must be balanced with [`OsBackend::exit`]; only the first call
    /// of an epoch acquires anything.
    fn init(&self) -> Result<()>;

    /// Release platform resources once the last matching init exits
    fn exit(&self);

    /// Enumerate attached devices
    ///
    /// Devices already present in `registry` (by session id) are reused;
    /// new ones are created and registered.
    fn get_device_list(&self, registry: &DeviceRegistry<Self::Device>)
    -> Result<Vec<Arc<Self::Device>>>;

    /// Open a device
    fn open(&self, device: &Arc<Self::Device>) -> Result<Self::Handle>;

    /// Close a device handle
    fn close(&self, handle: Self::Handle);

    /// Copy of the cached device descriptor
    fn get_device_descriptor(&self, device: &Self::Device) -> Result<DeviceDescriptor>;

    /// Fetch the active configuration descriptor into `buffer`
    ///
    /// Returns the number of bytes written.
    fn get_active_config_descriptor(&self, device: &Self::Device, buffer: &mut [u8])
    -> Result<usize>;

    /// Fetch a configuration descriptor by index into `buffer`
    fn get_config_descriptor(
        &self,
        device: &Self::Device,
        config_index: u8,
        buffer: &mut [u8],
    ) -> Result<usize>;

    /// Current configuration value
    fn get_configuration(&self, handle: &Self::Handle) -> Result<u8>;

    /// Select a configuration (negative means unconfigured)
    fn set_configuration(&self, handle: &Self::Handle, config: i32) -> Result<()>;

    fn claim_interface(&self, handle: &Self::Handle, interface_number: u8) -> Result<()>;

    fn release_interface(&self, handle: &Self::Handle, interface_number: u8) -> Result<()>;

    fn set_interface_altsetting(
        &self,
        handle: &Self::Handle,
        interface_number: u8,
        alt_setting: u8,
    ) -> Result<()>;

    fn clear_halt(&self, handle: &Self::Handle, endpoint: u8) -> Result<()>;

    fn reset_device(&self, handle: &Self::Handle) -> Result<()>;

    fn kernel_driver_active(&self, handle: &Self::Handle, interface_number: u8) -> Result<bool>;

    fn detach_kernel_driver(&self, handle: &Self::Handle, interface_number: u8) -> Result<()>;

    fn attach_kernel_driver(&self, handle: &Self::Handle, interface_number: u8) -> Result<()>;

    /// Backend cleanup for a device the library is dropping
    fn destroy_device(&self, device: &Self::Device);

    fn submit_transfer(&self, transfer: &mut Transfer) -> Result<()>;

    fn cancel_transfer(&self, transfer: &mut Transfer) -> Result<()>;

    fn clear_transfer_priv(&self, transfer: &mut Transfer) -> Result<()>;

    /// Process completed transfers after `num_ready` descriptors became ready
    fn handle_events(&self, num_ready: usize) -> Result<()>;

    /// Read the given clock
    fn clock_gettime(&self, clock: ClockId) -> Result<Timestamp>;
}
