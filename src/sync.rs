//! Connectivity probing and remote configuration synchronization
//!
//! The synchronizer moves between three states. Offline and InternetOnly
//! each own a probe job that runs every [`PROBE_INTERVAL`] until the next
//! state is reached. ServerReachable owns the periodic synchronization pass,
//! which compares the server's configuration checksum with the cached one
//! and applies a new configuration when they differ.

use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::errors::SensorError;
use crate::models::ConfigurationSnapshot;
use crate::packets::PacketManager;
use crate::scheduler::Scheduler;
use crate::store::ConfigurationStore;
use crate::transport::DeliveryTransport;

pub const SYNC_CONFIGURATION_JOB: &str = "sync-configuration";
pub const PROBE_INTERNET_JOB: &str = "probe-internet";
pub const PROBE_SERVER_JOB: &str = "probe-server";

pub const PROBE_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Offline,
    InternetOnly,
    ServerReachable,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Offline => "offline",
            ConnectivityState::InternetOnly => "internet only",
            ConnectivityState::ServerReachable => "server reachable",
        };
        f.write_str(name)
    }
}

/// Owner of the sensor-read cadence, told about every applied configuration
pub trait SensorCadence: Send + Sync {
    fn update_configuration(&self, snapshot: &ConfigurationSnapshot) -> Result<(), SensorError>;
}

/// What a synchronization pass ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    Applied { checksum: String },
    Rejected,
    Unreachable,
}

pub struct Synchronizer {
    transport: Arc<dyn DeliveryTransport>,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn ConfigurationStore>,
    packets: Arc<PacketManager>,
    cadence: Arc<dyn SensorCadence>,
    state: Mutex<ConnectivityState>,
    current: Mutex<ConfigurationSnapshot>,
}

impl Synchronizer {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        scheduler: Arc<Scheduler>,
        store: Arc<dyn ConfigurationStore>,
        packets: Arc<PacketManager>,
        cadence: Arc<dyn SensorCadence>,
        current: ConfigurationSnapshot,
    ) -> Self {
        Self {
            transport,
            scheduler,
            store,
            packets,
            cadence,
            state: Mutex::new(ConnectivityState::Offline),
            current: Mutex::new(current),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectivityState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            info!("Connectivity: {} -> {}", *state, next);
            *state = next;
        }
    }

    fn current(&self) -> MutexGuard<'_, ConfigurationSnapshot> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_checksum(&self) -> String {
        self.current().checksum.clone()
    }

    pub fn current_configuration(&self) -> ConfigurationSnapshot {
        self.current().clone()
    }

    /// Entry point: synchronize right away when the server is reachable, otherwise start probing
    pub async fn start(self: &Arc<Self>) {
        match self.detect().await {
            ConnectivityState::ServerReachable => {
                self.disarm(PROBE_INTERNET_JOB);
                self.disarm(PROBE_SERVER_JOB);
                self.set_state(ConnectivityState::ServerReachable);
                self.synchronize().await;
            }
            state => self.begin_probing(state),
        }
    }

    async fn detect(&self) -> ConnectivityState {
        if !self.transport.check_internet().await {
            ConnectivityState::Offline
        } else if !self.transport.check_server().await {
            ConnectivityState::InternetOnly
        } else {
            ConnectivityState::ServerReachable
        }
    }

    fn begin_probing(self: &Arc<Self>, state: ConnectivityState) {
        self.set_state(state);
        match state {
            ConnectivityState::Offline => {
                self.disarm(PROBE_SERVER_JOB);
                info!("No internet connection, checking every {:?}", PROBE_INTERVAL);
                self.arm(PROBE_INTERNET_JOB, PROBE_INTERVAL, |this| async move {
                    this.probe_internet().await
                });
            }
            ConnectivityState::InternetOnly => {
                self.disarm(PROBE_INTERNET_JOB);
                info!("Server not reachable, checking every {:?}", PROBE_INTERVAL);
                self.arm(PROBE_SERVER_JOB, PROBE_INTERVAL, |this| async move {
                    this.probe_server().await
                });
            }
            ConnectivityState::ServerReachable => {}
        }
    }

    /// Offline probe job
    pub async fn probe_internet(self: &Arc<Self>) {
        if !self.transport.check_internet().await {
            debug!("Still no internet connection");
            return;
        }
        self.disarm(PROBE_INTERNET_JOB);

        if self.transport.check_server().await {
            self.set_state(ConnectivityState::ServerReachable);
            self.synchronize().await;
        } else {
            self.begin_probing(ConnectivityState::InternetOnly);
        }
    }

    /// InternetOnly probe job
    pub async fn probe_server(self: &Arc<Self>) {
        if !self.transport.check_server().await {
            debug!("Server still not reachable");
            return;
        }
        self.disarm(PROBE_SERVER_JOB);
        self.set_state(ConnectivityState::ServerReachable);
        self.synchronize().await;
    }

    /// One synchronization pass; safe to call any number of times
    pub async fn synchronize(self: &Arc<Self>) -> SyncOutcome {
        info!("Checking online configuration..");
        let outcome = self.pull_configuration().await;

        if outcome == SyncOutcome::Unreachable {
            match self.detect().await {
                ConnectivityState::ServerReachable => {
                    warn!("Configuration check failed, retrying on the next pass");
                }
                state => {
                    self.disarm(SYNC_CONFIGURATION_JOB);
                    self.begin_probing(state);
                    return outcome;
                }
            }
        }

        let applied = matches!(outcome, SyncOutcome::Applied { .. });
        let interval = Duration::from_secs(self.current().config_check_interval_seconds);
        if applied || !self.scheduler.is_scheduled(SYNC_CONFIGURATION_JOB) {
            self.arm_synchronization(interval);
        }
        if applied || !self.packets.is_delivering() {
            self.packets.start_delivery(Arc::clone(&self.transport));
        }
        outcome
    }

    fn arm_synchronization(self: &Arc<Self>, interval: Duration) {
        self.arm(SYNC_CONFIGURATION_JOB, interval, |this| async move {
            this.synchronize().await;
        });
    }

    async fn pull_configuration(&self) -> SyncOutcome {
        let checksum = match self.transport.remote_checksum().await {
            Ok(checksum) => checksum,
            Err(e) => {
                warn!("Failed to get configuration checksum: {}", e);
                return SyncOutcome::Unreachable;
            }
        };

        let unchanged = checksum == self.current().checksum;
        if unchanged {
            debug!("Online configuration unchanged ({})", checksum);
            return SyncOutcome::Unchanged;
        }

        info!("Online configuration is new, updating configuration..");
        let payload = match self.transport.remote_configuration().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to get configuration: {}", e);
                return SyncOutcome::Unreachable;
            }
        };

        let snapshot = match self.store.validate(&payload) {
            Ok(snapshot) => snapshot.with_checksum(checksum.clone()),
            Err(e) => {
                error!("Rejected configuration {}: {}", checksum, e);
                return SyncOutcome::Rejected;
            }
        };

        if let Err(e) = self.store.save(&checksum, &payload) {
            error!("Failed to store configuration {}: {}", checksum, e);
            return SyncOutcome::Rejected;
        }

        self.apply(snapshot);
        SyncOutcome::Applied { checksum }
    }

    fn apply(&self, snapshot: ConfigurationSnapshot) {
        // Buffered packets carry the old checksum
        self.packets.reconfigure(&snapshot);
        if let Err(e) = self.cadence.update_configuration(&snapshot) {
            warn!("Failed to update sensor read configuration: {}", e);
        }
        info!("Configuration {} applied", snapshot.checksum);
        *self.current() = snapshot;
    }

    fn arm<F, Fut>(self: &Arc<Self>, key: &str, interval: Duration, job: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let this = Arc::clone(self);
        let result = self
            .scheduler
            .reschedule_interval(key, interval, move || job(Arc::clone(&this)));
        if let Err(e) = result {
            error!("Failed to schedule `{}`: {}", key, e);
        }
    }

    fn disarm(&self, key: &str) {
        if let Err(e) = self.scheduler.unschedule(key) {
            debug!("{}", e);
        }
    }
}
