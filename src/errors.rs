//! Error types shared across the datalogger core

use thiserror::Error;

/// A single write or read against the microcontroller failed
#[derive(Debug, Error)]
pub enum BusError {
    #[error("write of 0x{byte:02x} to device 0x{address:02x} failed: {reason}")]
    Write { address: u8, byte: u8, reason: String },

    #[error("read from device 0x{address:02x} failed: {reason}")]
    Read { address: u8, reason: String },
}

/// The microcontroller kept answering "not ready" for the whole poll budget
#[derive(Debug, Error)]
#[error("microcontroller 0x{address:02x} not ready after {attempts} polls")]
pub struct TimeoutError {
    pub address: u8,
    pub attempts: u32,
}

/// Outcome of a failed value read
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("network I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected response body: {0}")]
    Body(#[from] serde_json::Error),
}

/// A fetched configuration payload was rejected
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("configuration is not well-formed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("configuration field `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no job scheduled under key `{0}`")]
    NotFound(String),

    #[error("a job is already scheduled under key `{0}`")]
    AlreadyScheduled(String),

    #[error("job `{0}` needs a non-zero interval")]
    InvalidInterval(String),
}

#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("time server I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("time server did not answer in time")]
    Timeout,

    #[error("time server sent an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor read interval must be greater than zero")]
    InvalidInterval,

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("selecting register {register} on slave {slave} failed")]
    Select { slave: u8, register: u8 },

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("bus worker stopped: {0}")]
    Worker(String),
}
