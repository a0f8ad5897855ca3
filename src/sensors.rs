//! Periodic sensor reads through the microcontroller

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::errors::SensorError;
use crate::mcu::{Bus, McuReader, RegisterReading};
use crate::models::{ConfigurationSnapshot, RegisterWidth, SensorSpec};
use crate::packets::PacketManager;
use crate::scheduler::Scheduler;
use crate::sync::SensorCadence;

pub const READ_SENSORS_JOB: &str = "read-sensors";

/// Reads every configured register on a fixed cadence and captures the values as packets
pub struct SensorReader<B> {
    mcu: Arc<Mutex<McuReader<B>>>,
    packets: Arc<PacketManager>,
    scheduler: Arc<Scheduler>,
    sensors: Arc<Mutex<Vec<SensorSpec>>>,
}

impl<B> Clone for SensorReader<B> {
    fn clone(&self) -> Self {
        Self {
            mcu: Arc::clone(&self.mcu),
            packets: Arc::clone(&self.packets),
            scheduler: Arc::clone(&self.scheduler),
            sensors: Arc::clone(&self.sensors),
        }
    }
}

impl<B: Bus + Send + 'static> SensorReader<B> {
    pub fn new(mcu: McuReader<B>, packets: Arc<PacketManager>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            mcu: Arc::new(Mutex::new(mcu)),
            packets,
            scheduler,
            sensors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sensors(&self) -> Vec<SensorSpec> {
        self.sensors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read every configured sensor once, capturing a packet per successful read
    pub async fn read_all(&self) -> usize {
        let mut captured = 0;
        for sensor in self.sensors() {
            match self.read(&sensor).await {
                Ok(reading) => {
                    debug!("{} read {:?}", sensor.kind, reading);
                    self.packets.capture(&sensor.kind, reading.values());
                    captured += 1;
                }
                Err(e) => warn!("Failed to read sensor {}: {}", sensor.kind, e),
            }
        }
        captured
    }

    /// One select-then-read exchange on a blocking worker
    async fn read(&self, sensor: &SensorSpec) -> Result<RegisterReading, SensorError> {
        let mcu = Arc::clone(&self.mcu);
        let sensor = sensor.clone();

        tokio::task::spawn_blocking(move || {
            let mut mcu = mcu.lock().unwrap_or_else(PoisonError::into_inner);
            if !mcu.select_register(sensor.slave_address, sensor.register_address) {
                return Err(SensorError::Select {
                    slave: sensor.slave_address,
                    register: sensor.register_address,
                });
            }
            let reading = match sensor.width {
                RegisterWidth::Narrow => mcu.read_narrow_value()?,
                RegisterWidth::Wide => mcu.read_wide_value()?,
            };
            Ok(reading)
        })
        .await
        .map_err(|e| SensorError::Worker(e.to_string()))?
    }
}

impl<B: Bus + Send + 'static> SensorCadence for SensorReader<B> {
    fn update_configuration(&self, snapshot: &ConfigurationSnapshot) -> Result<(), SensorError> {
        if snapshot.sensor_read_interval_seconds == 0 {
            return Err(SensorError::InvalidInterval);
        }
        let interval = Duration::from_secs(snapshot.sensor_read_interval_seconds);

        *self.sensors.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.sensors.clone();

        let reader = self.clone();
        self.scheduler
            .reschedule_interval(READ_SENSORS_JOB, interval, move || {
                let reader = reader.clone();
                async move {
                    reader.read_all().await;
                }
            })?;

        info!(
            "Reading {} sensors every {:?}",
            snapshot.sensors.len(),
            interval
        );
        Ok(())
    }
}
