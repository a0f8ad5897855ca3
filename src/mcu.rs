//! Byte protocol spoken with the microcontroller that proxies modbus slaves
//!
//! Every exchange is a sequence of single-byte writes and reads on a shared
//! I2C bus. Value reads are polled: the MCU answers `0` while the modbus
//! request is still in flight, `255` when the value follows in extra bytes,
//! and any other byte is the value itself.

use log::{debug, error};
use std::thread::sleep;
use std::time::Duration;

use crate::errors::{BusError, ReadError, TimeoutError};

const CMD_CHECK_VERSION: u8 = 0xe0;
const CMD_INIT_MODBUS_SLAVE: u8 = 0xe1;
const CMD_REQUEST_MODBUS_SENSOR: u8 = 0xe2;

const NOT_READY: u8 = 0;
const ESCAPE: u8 = 255;

const LATENCY: Duration = Duration::from_millis(1);
const SETTLE_DELAY: Duration = Duration::from_millis(100);
const MAX_POLLS: u32 = 5000; // ~5 s at the default latency

/// Single-byte transactions against a device on the bus
pub trait Bus {
    fn write_byte(&mut self, address: u8, byte: u8) -> Result<(), BusError>;
    fn read_byte(&mut self, address: u8) -> Result<u8, BusError>;
}

/// Adapts any `embedded-hal` I2C master to [`Bus`]
pub struct I2cBus<I> {
    i2c: I,
}

impl<I> I2cBus<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }
}

impl<I: embedded_hal::i2c::I2c> Bus for I2cBus<I> {
    fn write_byte(&mut self, address: u8, byte: u8) -> Result<(), BusError> {
        self.i2c
            .write(address, &[byte])
            .map_err(|e| BusError::Write {
                address,
                byte,
                reason: format!("{:?}", e),
            })
    }

    fn read_byte(&mut self, address: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.i2c
            .read(address, &mut buf)
            .map_err(|e| BusError::Read {
                address,
                reason: format!("{:?}", e),
            })?;
        Ok(buf[0])
    }
}

/// Raw register value: `(b, 0)` for direct answers, both bytes verbatim after an escape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterReading {
    pub first: u8,
    pub second: u8,
}

impl RegisterReading {
    pub fn values(&self) -> Vec<f64> {
        vec![f64::from(self.first), f64::from(self.second)]
    }
}

/// Delays and poll budget used on the bus
#[derive(Debug, Clone, Copy)]
pub struct ReadTiming {
    pub latency: Duration,
    pub settle_delay: Duration,
    pub max_polls: u32,
}

impl Default for ReadTiming {
    fn default() -> Self {
        Self {
            latency: LATENCY,
            settle_delay: SETTLE_DELAY,
            max_polls: MAX_POLLS,
        }
    }
}

pub struct McuReader<B> {
    bus: B,
    address: u8,
    timing: ReadTiming,
}

impl<B: Bus> McuReader<B> {
    pub fn new(bus: B, address: u8) -> Self {
        Self::with_timing(bus, address, ReadTiming::default())
    }

    pub fn with_timing(bus: B, address: u8, timing: ReadTiming) -> Self {
        Self {
            bus,
            address,
            timing,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Three rounds of the version command; `false` if the MCU does not answer
    pub fn check_connection(&mut self) -> bool {
        match self.read_version() {
            Ok(version) => {
                debug!("MCU 0x{:02x} reports version {:?}", self.address, version);
                true
            }
            Err(e) => {
                error!("Couldn't connect with MCU: {}", e);
                false
            }
        }
    }

    fn read_version(&mut self) -> Result<[u8; 3], BusError> {
        let mut version = [0u8; 3];
        for byte in version.iter_mut() {
            self.bus.write_byte(self.address, CMD_CHECK_VERSION)?;
            sleep(self.timing.latency);
            *byte = self.bus.read_byte(self.address)?;
        }
        Ok(version)
    }

    /// Point the MCU at a register; must precede every value read
    pub fn select_register(&mut self, slave_address: u8, register_address: u8) -> bool {
        let result = [CMD_INIT_MODBUS_SLAVE, slave_address, register_address]
            .iter()
            .try_for_each(|&byte| self.bus.write_byte(self.address, byte));

        match result {
            Ok(()) => {
                sleep(self.timing.settle_delay);
                debug!(
                    "Address {} and register {} set to read",
                    slave_address, register_address
                );
                true
            }
            Err(e) => {
                error!("Connection with MCU lost: {}", e);
                false
            }
        }
    }

    /// Read a 16-bit register; the escape is followed by two value bytes
    pub fn read_wide_value(&mut self) -> Result<RegisterReading, ReadError> {
        let first = self.request_value()?;
        let reading = if first == ESCAPE {
            let high = self.read_after_latency()?;
            let low = self.read_after_latency()?;
            RegisterReading {
                first: high,
                second: low,
            }
        } else {
            RegisterReading {
                first,
                second: 0,
            }
        };
        debug!("16bit value read from MCU: {:?}", reading);
        Ok(reading)
    }

    /// Read an 8-bit register; the escape is followed by one value byte
    pub fn read_narrow_value(&mut self) -> Result<RegisterReading, ReadError> {
        let mut first = self.request_value()?;
        if first == ESCAPE {
            first = self.read_after_latency()?;
        }
        let reading = RegisterReading { first, second: 0 };
        debug!("8bit value read from MCU: {:?}", reading);
        Ok(reading)
    }

    /// Send the request command and poll until the MCU stops answering "not ready"
    fn request_value(&mut self) -> Result<u8, ReadError> {
        self.bus
            .write_byte(self.address, CMD_REQUEST_MODBUS_SENSOR)?;

        for _ in 0..self.timing.max_polls {
            let byte = self.read_after_latency()?;
            if byte != NOT_READY {
                return Ok(byte);
            }
        }

        Err(TimeoutError {
            address: self.address,
            attempts: self.timing.max_polls,
        }
        .into())
    }

    fn read_after_latency(&mut self) -> Result<u8, BusError> {
        sleep(self.timing.latency);
        self.bus.read_byte(self.address)
    }
}
