//! Edge datalogger core
//!
//! Reads modbus registers through a microcontroller on an I2C bus, buffers the
//! readings as packets and forwards them to a collection server, following the
//! server's configuration as it changes.

pub mod config;
pub mod errors;
pub mod mcu;
pub mod models;
pub mod packets;
pub mod scheduler;
pub mod sensors;
pub mod store;
pub mod sync;
pub mod timesync;
pub mod transport;
pub mod utils;
