//! Platform services the backend is built on

use crate::driver::{DriverResult, DriverService};
use common::{PerformanceCounter, StdSpawner, WorkerSpawner};
use std::sync::Arc;

/// Operating-system facilities needed to start an epoch
pub trait Platform: Send + Sync + 'static {
    type Driver: DriverService;

    /// Connect to the vendor driver
    fn open_driver(&self) -> DriverResult<Self::Driver>;

    /// The hardware performance counter
    fn performance_counter(&self) -> Arc<dyn PerformanceCounter>;

    /// How the clock worker thread is started
    fn spawner(&self) -> &dyn WorkerSpawner {
        &StdSpawner
    }
}
