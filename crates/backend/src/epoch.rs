//! Per-epoch backend state
//!
//! An epoch runs from the first `init` to the matching last `exit`. It owns
//! the driver connection, the clock service and the session table. Resources
//! are acquired in that order and released in reverse, including when an
//! acquisition step fails part way.

use crate::driver::{DriverError, DriverService};
use crate::platform::Platform;
use api::UsbError;
use common::{BackendConfig, ClockService, InternTable};
use thiserror::Error;
use tracing::{debug, error};

/// Why an epoch could not be started
#[derive(Debug, Error)]
pub enum EpochError {
    #[error("could not connect to driver: {0}")]
    Driver(DriverError),

    #[error("could not start clock service: {0}")]
    Clock(common::Error),

    #[error("could not allocate session table: {0}")]
    Sessions(common::Error),
}

impl From<EpochError> for UsbError {
    fn from(e: EpochError) -> Self {
        match e {
            EpochError::Driver(_) => UsbError::NotSupported,
            EpochError::Clock(_) | EpochError::Sessions(_) => UsbError::NoMem,
        }
    }
}

/// Open driver connection, closed when dropped
struct DriverConnection<D: DriverService> {
    driver: D,
}

impl<D: DriverService> Drop for DriverConnection<D> {
    fn drop(&mut self) {
        self.driver.close();
        debug!("driver connection closed");
    }
}

/// Resources shared by every operation of one epoch
///
/// Fields drop in declaration order, which is the teardown order.
pub struct Epoch<D: DriverService> {
    clock: ClockService,
    sessions: InternTable,
    driver: DriverConnection<D>,
}

impl<D: DriverService> Epoch<D> {
    /// Acquire the driver, then the clock service, then the session table
    pub fn acquire<P>(platform: &P, config: &BackendConfig) -> Result<Self, EpochError>
    where
        P: Platform<Driver = D>,
    {
        let driver = platform.open_driver().map_err(|e| {
            error!("could not connect to driver: {}", e);
            EpochError::Driver(e)
        })?;
        let driver = DriverConnection { driver };
        debug!("driver connection opened");

        let clock = ClockService::start(
            platform.performance_counter(),
            &config.clock,
            platform.spawner(),
        )
        .map_err(|e| {
            error!("could not start clock service: {}", e);
            EpochError::Clock(e)
        })?;

        let sessions = InternTable::with_capacity(config.sessions.capacity).map_err(|e| {
            error!("could not allocate session table: {}", e);
            EpochError::Sessions(e)
        })?;

        Ok(Self {
            clock,
            sessions,
            driver,
        })
    }

    /// Stop the clock worker, then release the table and the driver
    pub fn teardown(self) {
        let Self {
            clock,
            sessions,
            driver,
        } = self;

        clock.shutdown();
        drop(clock);
        drop(sessions);
        drop(driver);
    }

    pub fn driver(&self) -> &D {
        &self.driver.driver
    }

    pub fn clock(&self) -> &ClockService {
        &self.clock
    }

    pub fn sessions(&self) -> &InternTable {
        &self.sessions
    }
}
