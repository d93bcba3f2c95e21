//! Backend device records and handles

use api::{DeviceAddress, DeviceDescriptor, SessionId, UsbError};
use api::types::DESCRIPTOR_TYPE_DEVICE;
use std::sync::Arc;
use tracing::{debug, error};

/// Most configurations a device may report
pub const USB_MAXCONFIG: u8 = 8;

/// A device known to the backend
///
/// Holds the driver's reference for as long as the record lives.
#[derive(Debug)]
pub struct CeDevice<T> {
    driver_device: T,
    address: DeviceAddress,
    session: SessionId,
    descriptor: DeviceDescriptor,
}

impl<T> CeDevice<T> {
    pub(crate) fn new(
        driver_device: T,
        address: DeviceAddress,
        session: SessionId,
        descriptor: DeviceDescriptor,
    ) -> Self {
        Self {
            driver_device,
            address,
            session,
            descriptor,
        }
    }

    pub fn driver_device(&self) -> &T {
        &self.driver_device
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

/// Open handle to a device
#[derive(Debug)]
pub struct CeDeviceHandle<T> {
    device: Arc<CeDevice<T>>,
}

impl<T> CeDeviceHandle<T> {
    pub(crate) fn new(device: Arc<CeDevice<T>>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &CeDevice<T> {
        &self.device
    }
}

/// Check that a device descriptor is usable
pub fn sanitize_descriptor(descriptor: &DeviceDescriptor) -> api::Result<()> {
    if descriptor.length() as usize != api::DEVICE_DESCRIPTOR_LENGTH {
        error!("invalid device descriptor length {}", descriptor.length());
        return Err(UsbError::Io);
    }
    if descriptor.descriptor_type() != DESCRIPTOR_TYPE_DEVICE {
        error!(
            "invalid device descriptor type {}",
            descriptor.descriptor_type()
        );
        return Err(UsbError::Io);
    }
    if descriptor.num_configurations() > USB_MAXCONFIG {
        error!(
            "too many configurations ({} > {})",
            descriptor.num_configurations(),
            USB_MAXCONFIG
        );
        return Err(UsbError::Io);
    }
    if descriptor.num_configurations() == 0 {
        debug!("zero configurations, maybe an unauthorized device");
    }
    Ok(())
}
