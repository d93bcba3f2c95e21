//! Integration tests for the backend contract types
//!
//! Run with: `cargo test -p api --test api_tests`

use api::{
    ClockId, DEVICE_DESCRIPTOR_LENGTH, DeviceAddress, DeviceDescriptor, DeviceRegistry, SessionId,
    Timestamp, UsbError,
};
use std::sync::Arc;
use std::thread;

#[test]
fn test_timestamp_serializes_as_fields() {
    let ts = Timestamp::new(12, 345);
    let json = serde_json::to_string(&ts).unwrap();
    assert_eq!(json, r#"{"seconds":12,"nanoseconds":345}"#);

    let back: Timestamp = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ts);
}

#[test]
fn test_descriptor_bytes_are_preserved() {
    let mut raw = [0u8; DEVICE_DESCRIPTOR_LENGTH];
    raw[0] = 18;
    raw[1] = 1;
    raw[8] = 0xf9;
    raw[9] = 0x04;
    let desc = DeviceDescriptor::from_bytes(raw);

    assert_eq!(desc.as_bytes(), &raw);
    assert_eq!(desc.vendor_id(), 0x04f9);
    assert_eq!(desc.manufacturer_string_index(), None);
}

#[test]
fn test_device_address_json() {
    let addr = DeviceAddress {
        bus_number: 2,
        device_address: 5,
    };
    let value = serde_json::to_value(addr).unwrap();
    assert_eq!(value["bus_number"], 2);
    assert_eq!(value["device_address"], 5);
}

#[test]
fn test_unknown_clock_is_invalid_param() {
    for raw in [-5, 2, 3, i32::MAX] {
        assert_eq!(ClockId::try_from(raw), Err(UsbError::InvalidParam));
    }
}

#[test]
fn test_registry_concurrent_insert_converges() {
    let registry = Arc::new(DeviceRegistry::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.insert(SessionId(42), Arc::new(i)))
        })
        .collect();

    let winners: Vec<Arc<i32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = &winners[0];
    assert!(winners.iter().all(|w| Arc::ptr_eq(w, first)));
    assert_eq!(registry.len(), 1);
}
