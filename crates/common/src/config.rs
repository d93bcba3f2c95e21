//! Backend configuration
//!
//! All sections are optional in a config file; missing fields take their
//! defaults.
//!
//! ```toml
//! [clock]
//! request_timeout_ms = 100
//! join_timeout_ms = 1000
//! queue_capacity = 128
//!
//! [sessions]
//! capacity = 1021
//!
//! [driver]
//! max_devices = 256
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub clock: ClockSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub driver: DriverSettings,
}

impl BackendConfig {
    /// Reject settings the backend cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.clock.request_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "clock.request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.clock.join_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "clock.join_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.clock.queue_capacity == 0 {
            return Err(crate::Error::Config(
                "clock.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.driver.max_devices == 0 {
            return Err(crate::Error::Config(
                "driver.max_devices must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Clock service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSettings {
    /// How long a caller waits for the worker before retrying the wait
    #[serde(default = "ClockSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long shutdown waits for the worker to exit
    #[serde(default = "ClockSettings::default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Maximum number of queued clock requests
    #[serde(default = "ClockSettings::default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: Self::default_request_timeout_ms(),
            join_timeout_ms: Self::default_join_timeout_ms(),
            queue_capacity: Self::default_queue_capacity(),
        }
    }
}

impl ClockSettings {
    fn default_request_timeout_ms() -> u64 {
        100
    }

    fn default_join_timeout_ms() -> u64 {
        1000
    }

    fn default_queue_capacity() -> usize {
        128
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Session id table settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Requested table size (rounded up to a prime)
    #[serde(default = "SessionSettings::default_capacity")]
    pub capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

impl SessionSettings {
    fn default_capacity() -> usize {
        1021
    }
}

/// Driver service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Maximum number of devices fetched per enumeration
    #[serde(default = "DriverSettings::default_max_devices")]
    pub max_devices: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_devices: Self::default_max_devices(),
        }
    }
}

impl DriverSettings {
    fn default_max_devices() -> usize {
        256
    }
}
