//! Test utilities for the ceusb backend
//!
//! Provides a scriptable driver service and platform with failure injection,
//! plus counters for driver connections, live device references and clock
//! worker threads.
//!
//! # Example
//!
//! ```
//! use api::{DeviceRegistry, OsBackend};
//! use backend::CeBackend;
//! use backend::test_utils::{MockPlatform, mock_device};
//! use common::BackendConfig;
//!
//! let platform = MockPlatform::with_devices(vec![mock_device(1, 4, 0x1234, 0x5678)]);
//! let backend = CeBackend::new(platform, BackendConfig::default());
//!
//! backend.init().unwrap();
//! let registry = DeviceRegistry::new();
//! let devices = backend.get_device_list(&registry).unwrap();
//! assert_eq!(devices[0].descriptor().vendor_id(), 0x1234);
//! backend.exit();
//! ```

use crate::driver::{
    DriverAddress, DriverError, DriverResult, DriverService, SessionKey, codes,
};
use crate::platform::Platform;
use api::{ConfigSelector, DEVICE_DESCRIPTOR_LENGTH};
use common::{PerformanceCounter, WorkerSpawner, WorkerTask};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Build a valid device descriptor with one configuration
pub fn mock_descriptor(vendor_id: u16, product_id: u16) -> [u8; DEVICE_DESCRIPTOR_LENGTH] {
    let vid = vendor_id.to_le_bytes();
    let pid = product_id.to_le_bytes();
    [
        18, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 64, vid[0], vid[1], pid[0], pid[1], 0x00, 0x01,
        1, 2, 3, 1,
    ]
}

/// Minimal configuration descriptor (header only)
pub fn mock_config_descriptor() -> Vec<u8> {
    vec![9, 0x02, 9, 0, 1, 1, 0, 0x80, 50]
}

/// One scripted device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDeviceSpec {
    pub bus_number: u8,
    pub device_address: u8,
    pub session: SessionKey,
    pub descriptor: [u8; DEVICE_DESCRIPTOR_LENGTH],
    pub config_descriptor: Vec<u8>,
}

/// Device with a driver-assigned numeric session id
pub fn mock_device(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> MockDeviceSpec {
    MockDeviceSpec {
        bus_number: bus,
        device_address: address,
        session: SessionKey::Id(((bus as u64) << 8) | address as u64),
        descriptor: mock_descriptor(vendor_id, product_id),
        config_descriptor: mock_config_descriptor(),
    }
}

/// Device identified by a location path
pub fn mock_path_device(
    bus: u8,
    address: u8,
    path: &str,
    vendor_id: u16,
    product_id: u16,
) -> MockDeviceSpec {
    MockDeviceSpec {
        session: SessionKey::Path(path.to_string()),
        ..mock_device(bus, address, vendor_id, product_id)
    }
}

/// Shared state behind every [`MockDriver`] a platform hands out
#[derive(Debug, Default)]
pub struct MockDriverState {
    devices: Mutex<Vec<MockDeviceSpec>>,
    failures: Mutex<HashMap<&'static str, u32>>,
    calls: Mutex<Vec<String>>,
    configuration: AtomicU8,
    opens: AtomicUsize,
    closes: AtomicUsize,
    live_devices: AtomicUsize,
}

impl MockDriverState {
    /// Replace the set of attached devices
    pub fn set_devices(&self, devices: Vec<MockDeviceSpec>) {
        *self.devices.lock().unwrap_or_else(PoisonError::into_inner) = devices;
    }

    /// Make every call to `operation` fail with `code`
    pub fn fail(&self, operation: &'static str, code: u32) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, code);
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Control calls that reached the driver, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Device references handed out and not yet released
    pub fn live_devices(&self) -> usize {
        self.live_devices.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str) -> DriverResult<()> {
        match self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
        {
            Some(code) => Err(DriverError::new(*code)),
            None => Ok(()),
        }
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

/// Driver reference to one mock device; released on drop
#[derive(Debug)]
pub struct MockDevice {
    spec: MockDeviceSpec,
    state: Arc<MockDriverState>,
}

impl MockDevice {
    pub fn spec(&self) -> &MockDeviceSpec {
        &self.spec
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.state.live_devices.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted driver service
#[derive(Debug)]
pub struct MockDriver {
    state: Arc<MockDriverState>,
}

impl DriverService for MockDriver {
    type Device = MockDevice;

    fn device_list(&self, max_devices: usize) -> DriverResult<Vec<MockDevice>> {
        self.state.check("device_list")?;
        let specs = self
            .state
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Ok(specs
            .into_iter()
            .take(max_devices)
            .map(|spec| {
                self.state.live_devices.fetch_add(1, Ordering::SeqCst);
                MockDevice {
                    spec,
                    state: Arc::clone(&self.state),
                }
            })
            .collect())
    }

    fn device_address(&self, device: &MockDevice) -> DriverResult<DriverAddress> {
        self.state.check("device_address")?;
        Ok(DriverAddress {
            bus_number: device.spec.bus_number,
            device_address: device.spec.device_address,
            session: device.spec.session.clone(),
        })
    }

    fn device_descriptor(
        &self,
        device: &MockDevice,
    ) -> DriverResult<[u8; DEVICE_DESCRIPTOR_LENGTH]> {
        self.state.check("device_descriptor")?;
        Ok(device.spec.descriptor)
    }

    fn config_descriptor(
        &self,
        device: &MockDevice,
        selector: ConfigSelector,
        buffer: &mut [u8],
    ) -> DriverResult<usize> {
        self.state.check("config_descriptor")?;
        if let ConfigSelector::Index(index) = selector {
            if index >= device.spec.descriptor[17] {
                return Err(DriverError::new(codes::ERROR_INVALID_PARAMETER));
            }
        }
        let len = device.spec.config_descriptor.len().min(buffer.len());
        buffer[..len].copy_from_slice(&device.spec.config_descriptor[..len]);
        Ok(len)
    }

    fn get_config(&self, _device: &MockDevice) -> DriverResult<u8> {
        self.state.check("get_config")?;
        Ok(self.state.configuration.load(Ordering::SeqCst))
    }

    fn set_config(&self, _device: &MockDevice, value: u8) -> DriverResult<()> {
        self.state.check("set_config")?;
        self.state.record(format!("set_config({})", value));
        self.state.configuration.store(value, Ordering::SeqCst);
        Ok(())
    }

    fn claim_interface(&self, _device: &MockDevice, interface_number: u8) -> DriverResult<()> {
        self.state.check("claim_interface")?;
        self.state
            .record(format!("claim_interface({})", interface_number));
        Ok(())
    }

    fn release_interface(&self, _device: &MockDevice, interface_number: u8) -> DriverResult<()> {
        self.state.check("release_interface")?;
        self.state
            .record(format!("release_interface({})", interface_number));
        Ok(())
    }

    fn set_interface_alt_setting(
        &self,
        _device: &MockDevice,
        interface_number: u8,
        alt_setting: u8,
    ) -> DriverResult<()> {
        self.state.check("set_interface_alt_setting")?;
        self.state.record(format!(
            "set_interface_alt_setting({}, {})",
            interface_number, alt_setting
        ));
        Ok(())
    }

    fn clear_halt(&self, _device: &MockDevice, endpoint: u8) -> DriverResult<()> {
        self.state.check("clear_halt")?;
        self.state.record(format!("clear_halt({:#04x})", endpoint));
        Ok(())
    }

    fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// 1 MHz counter advancing one millisecond per read
#[derive(Debug)]
pub struct FakeCounter {
    frequency: Option<u64>,
    reads: AtomicU64,
}

impl FakeCounter {
    pub fn new() -> Self {
        Self {
            frequency: Some(1_000_000),
            reads: AtomicU64::new(0),
        }
    }

    /// Counter on a platform without a hires timer
    pub fn unavailable() -> Self {
        Self {
            frequency: None,
            reads: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for FakeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceCounter for FakeCounter {
    fn frequency(&self) -> Option<u64> {
        self.frequency
    }

    fn counter(&self) -> Option<u64> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        Some(n * 1_000)
    }
}

/// Decrements the running-worker count when the worker returns
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Thread spawner that can be told to fail and counts running workers
#[derive(Debug, Default)]
pub struct MockSpawner {
    fail: AtomicBool,
    spawned: AtomicUsize,
    running: Arc<AtomicUsize>,
}

impl WorkerSpawner for MockSpawner {
    fn spawn(&self, name: &str, task: WorkerTask) -> io::Result<JoinHandle<()>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::other("thread creation failed"));
        }

        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                running.fetch_add(1, Ordering::SeqCst);
                let _guard = RunningGuard(running);
                task();
            })?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }
}

/// Platform backed by [`MockDriver`], [`FakeCounter`] and [`MockSpawner`]
#[derive(Debug)]
pub struct MockPlatform {
    state: Arc<MockDriverState>,
    fail_open: AtomicBool,
    counter: Arc<FakeCounter>,
    spawner: MockSpawner,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_counter(FakeCounter::new())
    }

    pub fn with_devices(devices: Vec<MockDeviceSpec>) -> Self {
        let platform = Self::new();
        platform.state.set_devices(devices);
        platform
    }

    pub fn with_counter(counter: FakeCounter) -> Self {
        Self {
            state: Arc::default(),
            fail_open: AtomicBool::new(false),
            counter: Arc::new(counter),
            spawner: MockSpawner::default(),
        }
    }

    pub fn driver(&self) -> &MockDriverState {
        &self.state
    }

    pub fn counter(&self) -> &FakeCounter {
        &self.counter
    }

    /// Make the next driver connections fail
    pub fn fail_driver_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make the next worker thread creations fail
    pub fn fail_spawn(&self, fail: bool) {
        self.spawner.fail.store(fail, Ordering::SeqCst);
    }

    pub fn spawned_workers(&self) -> usize {
        self.spawner.spawned.load(Ordering::SeqCst)
    }

    /// Worker threads that have started and not yet returned
    pub fn running_workers(&self) -> usize {
        self.spawner.running.load(Ordering::SeqCst)
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    type Driver = MockDriver;

    fn open_driver(&self) -> DriverResult<MockDriver> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DriverError::new(codes::ERROR_DEVICE_NOT_CONNECTED));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockDriver {
            state: Arc::clone(&self.state),
        })
    }

    fn performance_counter(&self) -> Arc<dyn PerformanceCounter> {
        self.counter.clone()
    }

    fn spawner(&self) -> &dyn WorkerSpawner {
        &self.spawner
    }
}
