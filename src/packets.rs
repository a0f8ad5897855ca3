//! In-memory packet buffering and batched delivery

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::ConfigurationSnapshot;
use crate::scheduler::Scheduler;
use crate::timesync::TimeSource;
use crate::transport::DeliveryTransport;
use crate::utils::{format_unix_seconds, unix_now};

pub const SEND_PACKETS_JOB: &str = "send-packets";
pub const CHECK_PACKETS_JOB: &str = "check-packets-to-send";

/// Recheck interval used while the batch threshold is not met
pub const RETRY_SEND_PACKETS_INTERVAL: Duration = Duration::from_secs(20);

/// One buffered observation in its wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub checksum: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "timeDate")]
    pub timestamp: f64,
    #[serde(rename = "sensorData")]
    pub payload: Vec<f64>,
}

struct DeliverySettings {
    checksum: String,
    send_interval: Duration,
    minimum_packets_to_send: usize,
    max_buffered_packets: Option<usize>,
}

impl DeliverySettings {
    fn from_snapshot(snapshot: &ConfigurationSnapshot) -> Option<Self> {
        if snapshot.send_interval_seconds == 0 {
            return None;
        }
        Some(Self {
            checksum: snapshot.checksum.clone(),
            send_interval: Duration::from_secs(snapshot.send_interval_seconds),
            minimum_packets_to_send: snapshot.minimum_packets_to_send,
            max_buffered_packets: snapshot.max_buffered_packets,
        })
    }
}

struct BufferState {
    packets: VecDeque<Packet>,
    settings: DeliverySettings,
    /// Offset between the trusted clock and the local one, once known
    time_offset: Option<f64>,
    /// Bumped on every flush so in-flight deliveries don't drain a new queue
    generation: u64,
    dropped: u64,
}

pub struct PacketManager {
    scheduler: Arc<Scheduler>,
    time_source: Arc<dyn TimeSource>,
    transport: Mutex<Option<Arc<dyn DeliveryTransport>>>,
    state: Mutex<BufferState>,
}

impl PacketManager {
    pub fn new(
        scheduler: Arc<Scheduler>,
        time_source: Arc<dyn TimeSource>,
        snapshot: &ConfigurationSnapshot,
    ) -> Self {
        let settings = DeliverySettings::from_snapshot(snapshot).unwrap_or_else(|| {
            warn!("Invalid send interval in configuration, using fallback delivery settings");
            // The fallback always carries a non-zero interval
            let fallback = ConfigurationSnapshot::fallback();
            DeliverySettings {
                checksum: snapshot.checksum.clone(),
                send_interval: Duration::from_secs(fallback.send_interval_seconds),
                minimum_packets_to_send: snapshot.minimum_packets_to_send,
                max_buffered_packets: snapshot.max_buffered_packets,
            }
        });

        Self {
            scheduler,
            time_source,
            transport: Mutex::new(None),
            state: Mutex::new(BufferState {
                packets: VecDeque::new(),
                settings,
                time_offset: None,
                generation: 0,
                dropped: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Option<Arc<dyn DeliveryTransport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adopt delivery settings from `snapshot`; an unusable snapshot keeps the previous ones
    pub fn configure(&self, snapshot: &ConfigurationSnapshot) {
        Self::adopt(&mut self.state(), snapshot);
    }

    /// Drop the queue and adopt `snapshot` atomically, so no capture in between
    /// keeps the previous checksum
    pub fn reconfigure(&self, snapshot: &ConfigurationSnapshot) {
        let mut state = self.state();
        Self::clear(&mut state);
        Self::adopt(&mut state, snapshot);
    }

    fn adopt(state: &mut BufferState, snapshot: &ConfigurationSnapshot) {
        match DeliverySettings::from_snapshot(snapshot) {
            Some(settings) => {
                state.settings = settings;
                Self::enforce_bound(state);
                debug!(
                    "Packet delivery configured: every {:?}, more than {} packets",
                    state.settings.send_interval, state.settings.minimum_packets_to_send
                );
            }
            None => warn!("Failed to update configuration of the packet manager"),
        }
    }

    /// Queue a reading stamped with the current (corrected) time and active checksum
    pub fn capture(&self, kind: &str, values: Vec<f64>) {
        let mut state = self.state();
        let timestamp = unix_now() + state.time_offset.unwrap_or(0.0);
        let packet = Packet {
            checksum: state.settings.checksum.clone(),
            kind: kind.to_string(),
            timestamp,
            payload: values,
        };
        state.packets.push_back(packet);
        Self::enforce_bound(&mut state);
    }

    fn enforce_bound(state: &mut BufferState) {
        let Some(limit) = state.settings.max_buffered_packets else {
            return;
        };
        let excess = state.packets.len().saturating_sub(limit);
        if excess > 0 {
            state.packets.drain(..excess);
            state.dropped += excess as u64;
            warn!(
                "Packet buffer full ({} packets), dropped {} oldest ({} in total)",
                limit, excess, state.dropped
            );
        }
    }

    /// Drop every buffered packet
    pub fn flush(&self) {
        Self::clear(&mut self.state());
    }

    fn clear(state: &mut BufferState) {
        let removed = state.packets.len();
        state.packets.clear();
        state.generation += 1;
        info!("Removed {} packets from memory", removed);
    }

    pub fn len(&self) -> usize {
        self.state().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.state().packets.iter().cloned().collect()
    }

    pub fn is_time_synced(&self) -> bool {
        self.state().time_offset.is_some()
    }

    pub fn dropped(&self) -> u64 {
        self.state().dropped
    }

    /// (Re)start the periodic delivery job with `transport`
    pub fn start_delivery(self: &Arc<Self>, transport: Arc<dyn DeliveryTransport>) {
        *self.transport.lock().unwrap_or_else(PoisonError::into_inner) = Some(transport);

        let interval = self.state().settings.send_interval;
        let manager = Arc::clone(self);
        let result = self
            .scheduler
            .reschedule_interval(SEND_PACKETS_JOB, interval, move || {
                let manager = Arc::clone(&manager);
                async move { manager.deliver().await }
            });

        match result {
            Ok(()) => info!("Sending packets every {:?}", interval),
            Err(e) => error!("Failed to start send packets job: {}", e),
        }
    }

    pub fn is_delivering(&self) -> bool {
        self.scheduler.is_scheduled(SEND_PACKETS_JOB)
    }

    /// Delivery job: send the whole queue once it holds more than the minimum
    pub async fn deliver(self: &Arc<Self>) {
        self.update_time().await;

        let (batch, generation, dropped_before) = {
            let state = self.state();
            if state.packets.len() <= state.settings.minimum_packets_to_send {
                drop(state);
                self.arm_recheck();
                return;
            }
            (
                state.packets.iter().cloned().collect::<Vec<_>>(),
                state.generation,
                state.dropped,
            )
        };

        let Some(transport) = self.transport() else {
            warn!("No transport to send {} packets with", batch.len());
            return;
        };

        match transport.send_packets(&batch).await {
            Ok(accepted) => {
                let accepted = accepted.min(batch.len());
                let mut state = self.state();
                if state.generation != generation {
                    debug!("Packets flushed during delivery, nothing to remove");
                    return;
                }
                // Offered packets evicted by the buffer bound are already gone
                let evicted = (state.dropped - dropped_before) as usize;
                let remove = accepted.saturating_sub(evicted).min(state.packets.len());
                state.packets.drain(..remove);
                info!(
                    "Server accepted {} of {} packets, {} left in memory",
                    accepted,
                    batch.len(),
                    state.packets.len()
                );
            }
            Err(e) => warn!("Failed to send {} packets: {}", batch.len(), e),
        }
    }

    fn arm_recheck(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let result = self.scheduler.reschedule_interval(
            CHECK_PACKETS_JOB,
            RETRY_SEND_PACKETS_INTERVAL,
            move || {
                let manager = Arc::clone(&manager);
                async move { manager.check_packets_to_send().await }
            },
        );
        if let Err(e) = result {
            error!("Failed to start packet recheck job: {}", e);
        }
    }

    /// Recheck job: once the threshold is met, stop rechecking and deliver
    pub async fn check_packets_to_send(self: &Arc<Self>) {
        let ready = {
            let state = self.state();
            state.packets.len() > state.settings.minimum_packets_to_send
        };
        if !ready {
            return;
        }
        if let Err(e) = self.scheduler.unschedule(CHECK_PACKETS_JOB) {
            debug!("{}", e);
        }
        self.deliver().await;
    }

    /// Apply the trusted clock offset to buffered packets, once
    async fn update_time(&self) {
        if self.is_time_synced() {
            return;
        }

        match self.time_source.offset().await {
            Ok(offset) => {
                debug!(
                    "Updated time. Offset between system time and trusted time is {}, now {}",
                    offset,
                    format_unix_seconds(unix_now() + offset)
                );
                let mut state = self.state();
                for packet in state.packets.iter_mut() {
                    packet.timestamp += offset;
                }
                state.time_offset = Some(offset);
                info!("{} packets synced", state.packets.len());
            }
            Err(e) => warn!("Failed to update time: {}", e),
        }
    }
}
