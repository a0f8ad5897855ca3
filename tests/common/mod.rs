#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use edge_datalogger::errors::{
    ConfigValidationError, SensorError, StoreError, TimeSyncError, TransportError,
};
use edge_datalogger::models::ConfigurationSnapshot;
use edge_datalogger::packets::{Packet, PacketManager};
use edge_datalogger::scheduler::Scheduler;
use edge_datalogger::store::ConfigurationStore;
use edge_datalogger::sync::SensorCadence;
use edge_datalogger::timesync::TimeSource;
use edge_datalogger::transport::DeliveryTransport;

pub const VALID_PAYLOAD: &str = r#"{
    "sendIntervalSeconds": 45,
    "minimumPacketsToSend": 2,
    "configCheckIntervalSeconds": 120,
    "sensorReadIntervalSeconds": 15
}"#;

/// Collection server double with switchable reachability
pub struct FakeTransport {
    pub internet: AtomicBool,
    pub server: AtomicBool,
    pub checksum: Mutex<Option<String>>,
    pub configuration: Mutex<Option<String>>,
    /// `None` accepts every packet offered
    pub accept_limit: Mutex<Option<usize>>,
    pub fail_sends: AtomicBool,
    pub sent: Mutex<Vec<Vec<Packet>>>,
    pub configuration_fetches: AtomicUsize,
}

impl FakeTransport {
    pub fn online(checksum: &str, configuration: &str) -> Arc<Self> {
        Arc::new(Self {
            internet: AtomicBool::new(true),
            server: AtomicBool::new(true),
            checksum: Mutex::new(Some(checksum.to_string())),
            configuration: Mutex::new(Some(configuration.to_string())),
            accept_limit: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            configuration_fetches: AtomicUsize::new(0),
        })
    }

    pub fn offline() -> Arc<Self> {
        let transport = Self::online("unused", VALID_PAYLOAD);
        transport.internet.store(false, Ordering::SeqCst);
        transport.server.store(false, Ordering::SeqCst);
        transport
    }

    pub fn set_reachable(&self, internet: bool, server: bool) {
        self.internet.store(internet, Ordering::SeqCst);
        self.server.store(server, Ordering::SeqCst);
    }

    pub fn sent_batches(&self) -> Vec<Vec<Packet>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryTransport for FakeTransport {
    async fn check_internet(&self) -> bool {
        self.internet.load(Ordering::SeqCst)
    }

    async fn check_server(&self) -> bool {
        self.internet.load(Ordering::SeqCst) && self.server.load(Ordering::SeqCst)
    }

    async fn remote_checksum(&self) -> Result<String, TransportError> {
        if !self.server.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        self.checksum
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::Status(404))
    }

    async fn remote_configuration(&self) -> Result<String, TransportError> {
        self.configuration_fetches.fetch_add(1, Ordering::SeqCst);
        self.configuration
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::Status(404))
    }

    async fn send_packets(&self, packets: &[Packet]) -> Result<usize, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Status(500));
        }
        self.sent.lock().unwrap().push(packets.to_vec());
        let limit = self.accept_limit.lock().unwrap().unwrap_or(packets.len());
        Ok(limit.min(packets.len()))
    }
}

/// Holds every send open until [`GatedTransport::release`], so the buffer can be
/// changed while a batch is in flight
pub struct GatedTransport {
    pub accept: usize,
    pub sent: Mutex<Vec<Vec<Packet>>>,
    in_flight: Notify,
    gate: Notify,
}

impl GatedTransport {
    pub fn accepting(accept: usize) -> Arc<Self> {
        Arc::new(Self {
            accept,
            sent: Mutex::new(Vec::new()),
            in_flight: Notify::new(),
            gate: Notify::new(),
        })
    }

    /// Resolves once a send has started
    pub async fn wait_for_send(&self) {
        self.in_flight.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl DeliveryTransport for GatedTransport {
    async fn check_internet(&self) -> bool {
        true
    }

    async fn check_server(&self) -> bool {
        true
    }

    async fn remote_checksum(&self) -> Result<String, TransportError> {
        Err(TransportError::Status(404))
    }

    async fn remote_configuration(&self) -> Result<String, TransportError> {
        Err(TransportError::Status(404))
    }

    async fn send_packets(&self, packets: &[Packet]) -> Result<usize, TransportError> {
        self.sent.lock().unwrap().push(packets.to_vec());
        self.in_flight.notify_one();
        self.gate.notified().await;
        Ok(self.accept.min(packets.len()))
    }
}

/// Trusted clock double; `None` makes every query fail
pub struct FakeTimeSource {
    pub offset: Mutex<Option<f64>>,
    pub queries: AtomicUsize,
}

impl FakeTimeSource {
    pub fn new(offset: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            offset: Mutex::new(offset),
            queries: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TimeSource for FakeTimeSource {
    async fn offset(&self) -> Result<f64, TimeSyncError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.offset.lock().unwrap().ok_or(TimeSyncError::Timeout)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub saved: Mutex<Option<(String, String)>>,
}

impl ConfigurationStore for MemoryStore {
    fn load(&self) -> Result<Option<ConfigurationSnapshot>, StoreError> {
        match self.saved.lock().unwrap().as_ref() {
            Some((checksum, payload)) => Ok(Some(
                ConfigurationSnapshot::from_payload(payload)?.with_checksum(checksum.clone()),
            )),
            None => Ok(None),
        }
    }

    fn save(&self, checksum: &str, payload: &str) -> Result<(), StoreError> {
        *self.saved.lock().unwrap() = Some((checksum.to_string(), payload.to_string()));
        Ok(())
    }

    fn validate(&self, payload: &str) -> Result<ConfigurationSnapshot, ConfigValidationError> {
        ConfigurationSnapshot::from_payload(payload)
    }
}

/// Records every configuration pushed to the sensor cadence
#[derive(Default)]
pub struct RecordingCadence {
    pub updates: Mutex<Vec<ConfigurationSnapshot>>,
    pub fail: AtomicBool,
}

impl SensorCadence for RecordingCadence {
    fn update_configuration(&self, snapshot: &ConfigurationSnapshot) -> Result<(), SensorError> {
        self.updates.lock().unwrap().push(snapshot.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SensorError::InvalidInterval);
        }
        Ok(())
    }
}

pub fn snapshot(checksum: &str, minimum_packets_to_send: usize) -> ConfigurationSnapshot {
    ConfigurationSnapshot {
        minimum_packets_to_send,
        send_interval_seconds: 60,
        ..ConfigurationSnapshot::fallback()
    }
    .with_checksum(checksum)
}

pub fn packet_manager(
    scheduler: &Arc<Scheduler>,
    time_source: Arc<FakeTimeSource>,
    snapshot: &ConfigurationSnapshot,
) -> Arc<PacketManager> {
    Arc::new(PacketManager::new(Arc::clone(scheduler), time_source, snapshot))
}
