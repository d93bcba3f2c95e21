//! Driver service backed by libusb (through rusb)
//!
//! Lets the probe drive the backend against real hardware on a desktop host.
//! Devices are keyed by their port path, which stays stable across scans
//! while the device remains plugged into the same port.

use api::{ConfigSelector, DEVICE_DESCRIPTOR_LENGTH};
use backend::{DriverAddress, DriverError, DriverResult, DriverService, SessionKey, codes};
use byteorder::{ByteOrder, LittleEndian};
use rusb::{Context, Device, DeviceHandle, UsbContext, Version};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
const DESCRIPTOR_TYPE_CONFIG: u16 = 0x02;
const ENDPOINT_IN: u8 = 0x80;

/// Translate a libusb error into a platform error code
pub fn map_rusb_error(e: rusb::Error) -> DriverError {
    let code = match e {
        rusb::Error::NotSupported => codes::ERROR_NOT_SUPPORTED,
        rusb::Error::InvalidParam => codes::ERROR_INVALID_PARAMETER,
        rusb::Error::NoDevice => codes::ERROR_DEVICE_NOT_CONNECTED,
        rusb::Error::NotFound => codes::ERROR_NOT_FOUND,
        rusb::Error::Access => codes::ERROR_ACCESS_DENIED,
        rusb::Error::Busy => codes::ERROR_BUSY,
        rusb::Error::Timeout => codes::ERROR_SEM_TIMEOUT,
        _ => codes::ERROR_GEN_FAILURE,
    };
    DriverError::new(code)
}

/// Binary-coded decimal form of a USB version
fn version_to_bcd(version: Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16) << 4)
        | version.sub_minor() as u16
}

/// Re-encode a parsed descriptor in its wire layout
fn encode_descriptor(descriptor: &rusb::DeviceDescriptor) -> [u8; DEVICE_DESCRIPTOR_LENGTH] {
    let mut raw = [0u8; DEVICE_DESCRIPTOR_LENGTH];
    raw[0] = DEVICE_DESCRIPTOR_LENGTH as u8;
    raw[1] = api::types::DESCRIPTOR_TYPE_DEVICE;
    LittleEndian::write_u16(&mut raw[2..4], version_to_bcd(descriptor.usb_version()));
    raw[4] = descriptor.class_code();
    raw[5] = descriptor.sub_class_code();
    raw[6] = descriptor.protocol_code();
    raw[7] = descriptor.max_packet_size();
    LittleEndian::write_u16(&mut raw[8..10], descriptor.vendor_id());
    LittleEndian::write_u16(&mut raw[10..12], descriptor.product_id());
    LittleEndian::write_u16(&mut raw[12..14], version_to_bcd(descriptor.device_version()));
    raw[14] = descriptor.manufacturer_string_index().unwrap_or(0);
    raw[15] = descriptor.product_string_index().unwrap_or(0);
    raw[16] = descriptor.serial_number_string_index().unwrap_or(0);
    raw[17] = descriptor.num_configurations();
    raw
}

/// A libusb device plus its lazily opened handle
pub struct RusbDevice {
    device: Device<Context>,
    handle: Mutex<Option<DeviceHandle<Context>>>,
}

impl RusbDevice {
    fn new(device: Device<Context>) -> Self {
        Self {
            device,
            handle: Mutex::new(None),
        }
    }

    /// Run `f` on the open handle, opening the device on first use
    fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut DeviceHandle<Context>) -> rusb::Result<R>,
    ) -> DriverResult<R> {
        let mut guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let handle = self.device.open().map_err(map_rusb_error)?;
            debug!(
                "opened device {:03}/{:03}",
                self.device.bus_number(),
                self.device.address()
            );
            *guard = Some(handle);
        }

        let handle = guard
            .as_mut()
            .ok_or(DriverError::new(codes::ERROR_INVALID_HANDLE))?;
        f(handle).map_err(map_rusb_error)
    }

    /// Configuration index whose value is currently active
    fn active_config_index(&self) -> rusb::Result<u8> {
        let active = self.device.active_config_descriptor()?.number();
        let count = self.device.device_descriptor()?.num_configurations();
        (0..count)
            .find(|index| {
                self.device
                    .config_descriptor(*index)
                    .is_ok_and(|config| config.number() == active)
            })
            .ok_or(rusb::Error::NotFound)
    }
}

/// Connection to the host's libusb
pub struct RusbDriver {
    context: Context,
}

impl RusbDriver {
    pub fn open() -> DriverResult<Self> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }
}

impl DriverService for RusbDriver {
    type Device = RusbDevice;

    fn device_list(&self, max_devices: usize) -> DriverResult<Vec<RusbDevice>> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        Ok(devices
            .iter()
            .take(max_devices)
            .map(RusbDevice::new)
            .collect())
    }

    fn device_address(&self, device: &RusbDevice) -> DriverResult<DriverAddress> {
        let bus_number = device.device.bus_number();
        let device_address = device.device.address();

        let session = match device.device.port_numbers() {
            Ok(ports) if !ports.is_empty() => {
                let ports: Vec<String> = ports.iter().map(u8::to_string).collect();
                SessionKey::Path(format!("{}-{}", bus_number, ports.join(".")))
            }
            // Root hubs have no port path
            _ => SessionKey::Id(((bus_number as u64) << 8) | device_address as u64),
        };

        Ok(DriverAddress {
            bus_number,
            device_address,
            session,
        })
    }

    fn device_descriptor(
        &self,
        device: &RusbDevice,
    ) -> DriverResult<[u8; DEVICE_DESCRIPTOR_LENGTH]> {
        let descriptor = device.device.device_descriptor().map_err(map_rusb_error)?;
        Ok(encode_descriptor(&descriptor))
    }

    fn config_descriptor(
        &self,
        device: &RusbDevice,
        selector: ConfigSelector,
        buffer: &mut [u8],
    ) -> DriverResult<usize> {
        let index = match selector {
            ConfigSelector::Active => device.active_config_index().map_err(map_rusb_error)?,
            ConfigSelector::Index(index) => index,
        };

        device.with_handle(|handle| {
            handle.read_control(
                ENDPOINT_IN,
                REQUEST_GET_DESCRIPTOR,
                (DESCRIPTOR_TYPE_CONFIG << 8) | index as u16,
                0,
                buffer,
                CONTROL_TIMEOUT,
            )
        })
    }

    fn get_config(&self, device: &RusbDevice) -> DriverResult<u8> {
        device.with_handle(|handle| handle.active_configuration())
    }

    fn set_config(&self, device: &RusbDevice, value: u8) -> DriverResult<()> {
        device.with_handle(|handle| handle.set_active_configuration(value))
    }

    fn claim_interface(&self, device: &RusbDevice, interface_number: u8) -> DriverResult<()> {
        device.with_handle(|handle| handle.claim_interface(interface_number))
    }

    fn release_interface(&self, device: &RusbDevice, interface_number: u8) -> DriverResult<()> {
        device.with_handle(|handle| handle.release_interface(interface_number))
    }

    fn set_interface_alt_setting(
        &self,
        device: &RusbDevice,
        interface_number: u8,
        alt_setting: u8,
    ) -> DriverResult<()> {
        device.with_handle(|handle| handle.set_alternate_setting(interface_number, alt_setting))
    }

    fn clear_halt(&self, device: &RusbDevice, endpoint: u8) -> DriverResult<()> {
        device.with_handle(|handle| handle.clear_halt(endpoint))
    }

    fn close(&self) {
        debug!("closing libusb context");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_to_bcd() {
        assert_eq!(version_to_bcd(Version(2, 0, 0)), 0x0200);
        assert_eq!(version_to_bcd(Version(1, 1, 0)), 0x0110);
        assert_eq!(version_to_bcd(Version(3, 2, 0)), 0x0320);
        assert_eq!(version_to_bcd(Version(12, 3, 4)), 0x1234);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            map_rusb_error(rusb::Error::NotSupported).code,
            codes::ERROR_NOT_SUPPORTED
        );
        assert_eq!(
            map_rusb_error(rusb::Error::InvalidParam).code,
            codes::ERROR_INVALID_PARAMETER
        );
        assert_eq!(
            map_rusb_error(rusb::Error::NoDevice).code,
            codes::ERROR_DEVICE_NOT_CONNECTED
        );
        assert_eq!(map_rusb_error(rusb::Error::Busy).code, codes::ERROR_BUSY);
        assert_eq!(
            map_rusb_error(rusb::Error::Pipe).code,
            codes::ERROR_GEN_FAILURE
        );
    }
}
