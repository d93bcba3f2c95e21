//! Host USB platform
//!
//! Supplies the backend with a libusb driver service, the host's monotonic
//! clock as performance counter and ordinary named threads for the worker.

pub mod driver;

pub use driver::RusbDriver;

use backend::{DriverResult, Platform};
use common::{PerformanceCounter, SystemCounter};
use std::sync::Arc;

/// Platform of the machine the probe runs on
pub struct HostPlatform {
    counter: Arc<SystemCounter>,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(SystemCounter::new()),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    type Driver = RusbDriver;

    fn open_driver(&self) -> DriverResult<RusbDriver> {
        RusbDriver::open()
    }

    fn performance_counter(&self) -> Arc<dyn PerformanceCounter> {
        self.counter.clone()
    }
}
