//! Backend type definitions
//!
//! Timestamps, clock ids, device identity and the raw descriptor types that
//! cross the boundary between the USB library and a platform backend.

use crate::error::UsbError;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a standard USB device descriptor in bytes
pub const DEVICE_DESCRIPTOR_LENGTH: usize = 18;

/// Descriptor type code of a device descriptor
pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;

/// A point in time as seconds plus nanoseconds
///
/// Backends hand out copies; a timestamp never refers to backend state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds
    pub seconds: i64,
    /// Nanoseconds within the second (always below 1_000_000_000)
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Create a timestamp
    pub const fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Total nanoseconds represented by this timestamp
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.seconds) * 1_000_000_000 + i128::from(self.nanoseconds)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// Clock kinds a backend can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockId {
    /// Non-decreasing clock, independent of calendar adjustments
    Monotonic,
    /// Calendar time since the Unix epoch
    Realtime,
}

impl TryFrom<i32> for ClockId {
    type Error = UsbError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClockId::Monotonic),
            1 => Ok(ClockId::Realtime),
            _ => Err(UsbError::InvalidParam),
        }
    }
}

/// Session identifier
///
/// Distinguishes one physical device across repeated enumeration scans so
/// the library can reuse device objects it already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bus location of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// Bus number
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}/{:03}", self.bus_number, self.device_address)
    }
}

/// Raw standard device descriptor
///
/// The bytes are stored exactly as the device reported them. Accessors
/// decode individual fields; multi-byte fields are little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor([u8; DEVICE_DESCRIPTOR_LENGTH]);

impl DeviceDescriptor {
    /// Wrap raw descriptor bytes
    pub const fn from_bytes(bytes: [u8; DEVICE_DESCRIPTOR_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw descriptor bytes
    pub fn as_bytes(&self) -> &[u8; DEVICE_DESCRIPTOR_LENGTH] {
        &self.0
    }

    /// bLength
    pub fn length(&self) -> u8 {
        self.0[0]
    }

    /// bDescriptorType
    pub fn descriptor_type(&self) -> u8 {
        self.0[1]
    }

    /// bcdUSB
    pub fn usb_version(&self) -> u16 {
        LittleEndian::read_u16(&self.0[2..4])
    }

    /// bDeviceClass
    pub fn class_code(&self) -> u8 {
        self.0[4]
    }

    /// bDeviceSubClass
    pub fn sub_class_code(&self) -> u8 {
        self.0[5]
    }

    /// bDeviceProtocol
    pub fn protocol_code(&self) -> u8 {
        self.0[6]
    }

    /// bMaxPacketSize0
    pub fn max_packet_size(&self) -> u8 {
        self.0[7]
    }

    /// idVendor
    pub fn vendor_id(&self) -> u16 {
        LittleEndian::read_u16(&self.0[8..10])
    }

    /// idProduct
    pub fn product_id(&self) -> u16 {
        LittleEndian::read_u16(&self.0[10..12])
    }

    /// bcdDevice
    pub fn device_version(&self) -> u16 {
        LittleEndian::read_u16(&self.0[12..14])
    }

    /// iManufacturer (None when the device has no such string)
    pub fn manufacturer_string_index(&self) -> Option<u8> {
        non_zero(self.0[14])
    }

    /// iProduct
    pub fn product_string_index(&self) -> Option<u8> {
        non_zero(self.0[15])
    }

    /// iSerialNumber
    pub fn serial_number_string_index(&self) -> Option<u8> {
        non_zero(self.0[16])
    }

    /// bNumConfigurations
    pub fn num_configurations(&self) -> u8 {
        self.0[17]
    }
}

fn non_zero(index: u8) -> Option<u8> {
    (index != 0).then_some(index)
}

/// Which configuration descriptor to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSelector {
    /// The currently active configuration
    Active,
    /// Configuration by zero-based index
    Index(u8),
}

/// USB transfer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// A transfer handed to the backend for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Endpoint address (includes direction bit)
    pub endpoint: u8,
    /// Transfer kind
    pub kind: TransferKind,
    /// Data buffer (OUT data, or space for IN data)
    pub buffer: Vec<u8>,
    /// Timeout in milliseconds (0 = unlimited)
    pub timeout_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> DeviceDescriptor {
        DeviceDescriptor::from_bytes([
            18, 1, 0x00, 0x02, 0xff, 0x01, 0x02, 64, 0x34, 0x12, 0x78, 0x56, 0x01, 0x01, 1, 2, 0,
            1,
        ])
    }

    #[test]
    fn test_descriptor_fields() {
        let desc = sample_descriptor();
        assert_eq!(desc.length(), 18);
        assert_eq!(desc.descriptor_type(), DESCRIPTOR_TYPE_DEVICE);
        assert_eq!(desc.usb_version(), 0x0200);
        assert_eq!(desc.class_code(), 0xff);
        assert_eq!(desc.sub_class_code(), 0x01);
        assert_eq!(desc.protocol_code(), 0x02);
        assert_eq!(desc.max_packet_size(), 64);
        assert_eq!(desc.vendor_id(), 0x1234);
        assert_eq!(desc.product_id(), 0x5678);
        assert_eq!(desc.device_version(), 0x0101);
        assert_eq!(desc.manufacturer_string_index(), Some(1));
        assert_eq!(desc.product_string_index(), Some(2));
        assert_eq!(desc.serial_number_string_index(), None);
        assert_eq!(desc.num_configurations(), 1);
    }

    #[test]
    fn test_clock_id_from_raw() {
        assert_eq!(ClockId::try_from(0), Ok(ClockId::Monotonic));
        assert_eq!(ClockId::try_from(1), Ok(ClockId::Realtime));
        assert_eq!(ClockId::try_from(-1), Err(UsbError::InvalidParam));
        assert_eq!(ClockId::try_from(2), Err(UsbError::InvalidParam));
    }

    #[test]
    fn test_timestamp_ordering_and_display() {
        let a = Timestamp::new(1, 999_999_999);
        let b = Timestamp::new(2, 0);
        assert!(a < b);
        assert_eq!(b.as_nanos() - a.as_nanos(), 1);
        assert_eq!(Timestamp::new(3, 42).to_string(), "3.000000042");
    }

    #[test]
    fn test_device_address_display() {
        let addr = DeviceAddress {
            bus_number: 1,
            device_address: 12,
        };
        assert_eq!(addr.to_string(), "001/012");
    }
}
