use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use std::collections::VecDeque;
use std::time::Duration;

use edge_datalogger::errors::ReadError;
use edge_datalogger::mcu::{I2cBus, McuReader, ReadTiming, RegisterReading};

const MCU: u8 = 0x04;

/// I2C master double: answers reads from a script, accepts every write
#[derive(Default)]
struct FakeI2c {
    reads: VecDeque<u8>,
    nack: bool,
}

impl ErrorType for FakeI2c {
    type Error = ErrorKind;
}

impl I2c for FakeI2c {
    fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if self.nack {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(_) => {}
                Operation::Read(buffer) => {
                    for byte in buffer.iter_mut() {
                        *byte = self.reads.pop_front().ok_or(ErrorKind::Other)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn reader(i2c: FakeI2c) -> McuReader<I2cBus<FakeI2c>> {
    let timing = ReadTiming {
        latency: Duration::ZERO,
        settle_delay: Duration::ZERO,
        max_polls: 50,
    };
    McuReader::with_timing(I2cBus::new(i2c), MCU, timing)
}

#[test]
fn select_then_wide_read_over_i2c() {
    let i2c = FakeI2c {
        reads: VecDeque::from(vec![0, 0, 255, 0x12, 0x34]),
        ..Default::default()
    };
    let mut mcu = reader(i2c);
    assert_eq!(mcu.address(), MCU);

    assert!(mcu.select_register(7, 30));
    let reading = mcu.read_wide_value().unwrap();
    assert_eq!(
        reading,
        RegisterReading {
            first: 0x12,
            second: 0x34
        }
    );
    assert_eq!(reading.values(), vec![18.0, 52.0]);
}

#[test]
fn version_check_against_absent_device() {
    let mut mcu = reader(FakeI2c {
        nack: true,
        ..Default::default()
    });
    assert!(!mcu.check_connection());
    assert!(!mcu.select_register(1, 1));
    assert!(matches!(mcu.read_narrow_value(), Err(ReadError::Bus(_))));
}

#[test]
fn stalled_device_times_out_without_blocking_forever() {
    let i2c = FakeI2c {
        reads: VecDeque::from(vec![0; 100]),
        ..Default::default()
    };
    let mut mcu = reader(i2c);
    match mcu.read_narrow_value() {
        Err(ReadError::Timeout(timeout)) => {
            assert_eq!(timeout.attempts, 50);
            assert_eq!(timeout.address, MCU);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}
