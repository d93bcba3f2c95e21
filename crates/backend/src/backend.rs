//! Windows CE style backend
//!
//! Implements the operation table on top of a [`Platform`]. Every epoch
//! shares one driver connection, one clock service and one session table,
//! all owned by the lifecycle guard. Operations run under the guard's read
//! side, so `exit` waits for them before tearing the epoch down.

use crate::device::{CeDevice, CeDeviceHandle, sanitize_descriptor};
use crate::driver::{DriverError, DriverService, SessionKey, codes};
use crate::epoch::Epoch;
use crate::platform::Platform;
use api::{
    ClockId, ConfigSelector, DeviceAddress, DeviceDescriptor, DeviceRegistry, OsBackend,
    SessionId, Timestamp, Transfer, UsbError,
};
use common::clock::realtime_now;
use common::{Acquired, BackendConfig, ClockStats, Lifecycle};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name reported by [`OsBackend::name`]
pub const BACKEND_NAME: &str = "Windows CE";

/// Prefix of the per-process init/exit gate name
pub const GATE_PREFIX: &str = "libusb_init";

type DriverDevice<P> = <<P as Platform>::Driver as DriverService>::Device;

/// Backend over a vendor driver service
pub struct CeBackend<P: Platform> {
    platform: P,
    config: BackendConfig,
    lifecycle: Lifecycle<Epoch<P::Driver>>,
}

impl<P: Platform> CeBackend<P> {
    pub fn new(platform: P, config: BackendConfig) -> Self {
        Self {
            platform,
            config,
            lifecycle: Lifecycle::for_current_process(GATE_PREFIX),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Name of the init/exit gate
    pub fn gate_name(&self) -> &str {
        self.lifecycle.name()
    }

    /// Usage counter of the init/exit gate
    pub fn usage(&self) -> i32 {
        self.lifecycle.usage()
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Clock worker statistics of the running epoch
    pub fn clock_stats(&self) -> Option<ClockStats> {
        self.lifecycle.with_current(|epoch| epoch.clock().stats())
    }

    /// Number of interned session paths in the running epoch
    pub fn session_count(&self) -> Option<usize> {
        self.lifecycle.with_current(|epoch| epoch.sessions().len())
    }

    fn with_epoch<R>(
        &self,
        f: impl FnOnce(&Epoch<P::Driver>) -> api::Result<R>,
    ) -> api::Result<R> {
        self.lifecycle.with_current(f).unwrap_or_else(|| {
            debug!("called outside of an init/exit epoch");
            Err(UsbError::Other)
        })
    }

    fn session_id(epoch: &Epoch<P::Driver>, key: SessionKey) -> api::Result<SessionId> {
        match key {
            SessionKey::Id(id) => Ok(SessionId(id)),
            SessionKey::Path(path) => epoch
                .sessions()
                .find_or_insert(&path)
                .map(|index| SessionId(index as u64))
                .map_err(|e| {
                    error!("could not assign session id to {}: {}", path, e);
                    UsbError::NoMem
                }),
        }
    }

    fn discover(
        &self,
        epoch: &Epoch<P::Driver>,
        registry: &DeviceRegistry<CeDevice<DriverDevice<P>>>,
    ) -> api::Result<Vec<Arc<CeDevice<DriverDevice<P>>>>> {
        let driver = epoch.driver();
        let devices = driver
            .device_list(self.config.driver.max_devices)
            .map_err(|e| {
                error!("could not get devices: {}", e);
                UsbError::Other
            })?;

        let mut discovered = Vec::with_capacity(devices.len());
        for (i, driver_device) in devices.into_iter().enumerate() {
            let found = driver.device_address(&driver_device).map_err(|e| {
                error!("could not get device address for {}: {}", i, e);
                UsbError::Other
            })?;
            let address = DeviceAddress {
                bus_number: found.bus_number,
                device_address: found.device_address,
            };
            let session = Self::session_id(epoch, found.session)?;

            if let Some(existing) = registry.get(session) {
                debug!("using existing device for {} (session {})", address, session.0);
                discovered.push(existing);
                continue;
            }

            debug!("allocating new device for {} (session {})", address, session.0);
            let raw = driver.device_descriptor(&driver_device).map_err(|e| {
                error!("could not get device descriptor for {}: {}", address, e);
                UsbError::Io
            })?;
            let descriptor = DeviceDescriptor::from_bytes(raw);
            sanitize_descriptor(&descriptor)?;

            let device = Arc::new(CeDevice::new(driver_device, address, session, descriptor));
            discovered.push(registry.insert(session, device));
        }

        Ok(discovered)
    }
}

fn set_config_error(e: DriverError) -> UsbError {
    match e.code {
        codes::ERROR_NOT_SUPPORTED => UsbError::NotSupported,
        codes::ERROR_INVALID_PARAMETER | codes::ERROR_INVALID_HANDLE => UsbError::InvalidParam,
        _ => UsbError::NotFound,
    }
}

impl<P: Platform> OsBackend for CeBackend<P> {
    type Device = CeDevice<DriverDevice<P>>;
    type Handle = CeDeviceHandle<DriverDevice<P>>;

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn init(&self) -> api::Result<()> {
        let outcome = self
            .lifecycle
            .acquire(|| Epoch::acquire(&self.platform, &self.config))
            .map_err(|e| {
                error!("backend init failed: {}", e);
                UsbError::from(e)
            })?;

        if outcome == Acquired::First {
            info!("{} backend initialized", BACKEND_NAME);
        }
        Ok(())
    }

    fn exit(&self) {
        self.lifecycle.release(Epoch::teardown);
    }

    fn get_device_list(
        &self,
        registry: &DeviceRegistry<Self::Device>,
    ) -> api::Result<Vec<Arc<Self::Device>>> {
        self.with_epoch(|epoch| self.discover(epoch, registry))
    }

    fn open(&self, device: &Arc<Self::Device>) -> api::Result<Self::Handle> {
        Ok(CeDeviceHandle::new(Arc::clone(device)))
    }

    fn close(&self, handle: Self::Handle) {
        drop(handle);
    }

    fn get_device_descriptor(&self, device: &Self::Device) -> api::Result<DeviceDescriptor> {
        Ok(*device.descriptor())
    }

    fn get_active_config_descriptor(
        &self,
        device: &Self::Device,
        buffer: &mut [u8],
    ) -> api::Result<usize> {
        self.with_epoch(|epoch| {
            epoch
                .driver()
                .config_descriptor(device.driver_device(), ConfigSelector::Active, buffer)
                .map_err(|e| {
                    debug!("could not get active config descriptor: {}", e);
                    UsbError::InvalidParam
                })
        })
    }

    fn get_config_descriptor(
        &self,
        device: &Self::Device,
        config_index: u8,
        buffer: &mut [u8],
    ) -> api::Result<usize> {
        self.with_epoch(|epoch| {
            epoch
                .driver()
                .config_descriptor(
                    device.driver_device(),
                    ConfigSelector::Index(config_index),
                    buffer,
                )
                .map_err(|e| {
                    debug!("could not get config descriptor {}: {}", config_index, e);
                    UsbError::InvalidParam
                })
        })
    }

    fn get_configuration(&self, handle: &Self::Handle) -> api::Result<u8> {
        self.with_epoch(|epoch| {
            epoch
                .driver()
                .get_config(handle.device().driver_device())
                .map_err(|e| {
                    debug!("could not get configuration: {}", e);
                    UsbError::InvalidParam
                })
        })
    }

    fn set_configuration(&self, handle: &Self::Handle, config: i32) -> api::Result<()> {
        let value = u8::try_from(config.max(0)).map_err(|_| UsbError::InvalidParam)?;
        self.with_epoch(|epoch| {
            epoch
                .driver()
                .set_config(handle.device().driver_device(), value)
                .map_err(|e| {
                    debug!("could not set configuration {}: {}", value, e);
                    set_config_error(e)
                })
        })
    }

    fn claim_interface(&self, handle: &Self::Handle, interface_number: u8) -> api::Result<()> {
        self.with_epoch(|epoch| {
            epoch
                .driver()
                .claim_interface(handle.device().driver_device(), interface_number)
                .map_err(|e| {
                    debug!("could not claim interface {}: {}", interface_number, e);
                    UsbError::Other
                })
        })
    }

    fn release_interface(&self, handle: &Self::Handle, interface_number: u8) -> api::Result<()> {
        self.with_epoch(|epoch| {
            let driver = epoch.driver();
            let device = handle.device().driver_device();

            driver
                .set_interface_alt_setting(device, interface_number, 0)
                .map_err(|e| {
                    debug!(
                        "could not reset interface {} to alt setting 0: {}",
                        interface_number, e
                    );
                    UsbError::Io
                })?;

            driver.release_interface(device, interface_number).map_err(|e| {
                debug!("could not release interface {}: {}", interface_number, e);
                UsbError::Other
            })
        })
    }

    fn set_interface_altsetting(
        &self,
        handle: &Self::Handle,
        interface_number: u8,
        alt_setting: u8,
    ) -> api::Result<()> {
        self.with_epoch(|epoch| {
            epoch
                .driver()
                .set_interface_alt_setting(
                    handle.device().driver_device(),
                    interface_number,
                    alt_setting,
                )
                .map_err(|e| {
                    debug!(
                        "could not set interface {} alt setting {}: {}",
                        interface_number, alt_setting, e
                    );
                    UsbError::Io
                })
        })
    }

    fn clear_halt(&self, handle: &Self::Handle, endpoint: u8) -> api::Result<()> {
        self.with_epoch(|epoch| {
            epoch
                .driver()
                .clear_halt(handle.device().driver_device(), endpoint)
                .map_err(|e| {
                    debug!("could not clear halt on endpoint {:#04x}: {}", endpoint, e);
                    UsbError::Io
                })
        })
    }

    fn reset_device(&self, _handle: &Self::Handle) -> api::Result<()> {
        Err(UsbError::NotSupported)
    }

    fn kernel_driver_active(
        &self,
        _handle: &Self::Handle,
        _interface_number: u8,
    ) -> api::Result<bool> {
        Err(UsbError::NotSupported)
    }

    fn detach_kernel_driver(&self, _handle: &Self::Handle, _interface_number: u8) -> api::Result<()> {
        Err(UsbError::NotSupported)
    }

    fn attach_kernel_driver(&self, _handle: &Self::Handle, _interface_number: u8) -> api::Result<()> {
        Err(UsbError::NotSupported)
    }

    fn destroy_device(&self, device: &Self::Device) {
        debug!("destroying device {}", device.address());
    }

    fn submit_transfer(&self, _transfer: &mut Transfer) -> api::Result<()> {
        Err(UsbError::NotSupported)
    }

    fn cancel_transfer(&self, _transfer: &mut Transfer) -> api::Result<()> {
        Err(UsbError::NotSupported)
    }

    fn clear_transfer_priv(&self, _transfer: &mut Transfer) -> api::Result<()> {
        Err(UsbError::NotSupported)
    }

    fn handle_events(&self, _num_ready: usize) -> api::Result<()> {
        Err(UsbError::NotSupported)
    }

    fn clock_gettime(&self, clock: ClockId) -> api::Result<Timestamp> {
        match clock {
            ClockId::Realtime => Ok(realtime_now()),
            ClockId::Monotonic => self.with_epoch(|epoch| {
                epoch.clock().now(ClockId::Monotonic).map_err(|e| {
                    warn!("monotonic clock unavailable: {}", e);
                    UsbError::Other
                })
            }),
        }
    }
}
