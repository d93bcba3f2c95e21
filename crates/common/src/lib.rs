//! Common building blocks for ceusb
//!
//! This crate holds the platform-independent parts of the backend: the
//! request-coalescing clock service, the fixed-capacity interning table used
//! for session ids, the reference-counted lifecycle guard that owns them,
//! plus configuration, error handling and logging setup.

pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod intern;
pub mod lifecycle;
pub mod logging;

pub use channel::{ClockRequest, ClockRequester, ClockResponder, create_clock_channel};
pub use clock::{
    ClockService, ClockStats, PerformanceCounter, StdSpawner, SystemCounter, WorkerSpawner,
    WorkerTask,
};
pub use config::{BackendConfig, ClockSettings, DriverSettings, SessionSettings};
pub use error::{Error, Result};
pub use intern::InternTable;
pub use lifecycle::{Acquired, Lifecycle, Released};
pub use logging::setup_logging;
