//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Table full: all {capacity} slots are in use")]
    TableFull { capacity: usize },

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Clock service stopped")]
    ClockStopped,

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
