use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use edge_datalogger::config::AgentConfig;
use edge_datalogger::mcu::{I2cBus, McuReader};
use edge_datalogger::models::ConfigurationSnapshot;
use edge_datalogger::packets::PacketManager;
use edge_datalogger::scheduler::Scheduler;
use edge_datalogger::sensors::SensorReader;
use edge_datalogger::store::{ConfigurationStore, FileConfigurationStore};
use edge_datalogger::sync::{SensorCadence, Synchronizer};
use edge_datalogger::timesync::SntpTimeSource;
use edge_datalogger::transport::HttpTransport;

const ALIVE_INTERVAL_SECS: u64 = 3600;

fn load_configuration(store: &FileConfigurationStore) -> ConfigurationSnapshot {
    match store.load() {
        Ok(Some(snapshot)) => {
            info!("Loaded configuration {}", snapshot.checksum);
            snapshot
        }
        Ok(None) => {
            warn!("No stored configuration, using built-in defaults");
            ConfigurationSnapshot::fallback()
        }
        Err(e) => {
            error!("Failed to load stored configuration: {}", e);
            ConfigurationSnapshot::fallback()
        }
    }
}

async fn run(config: AgentConfig, scheduler: Arc<Scheduler>) -> Result<(), Box<dyn std::error::Error>> {
    info!("Initialising system...");

    let store = Arc::new(FileConfigurationStore::new(&config.configuration_path));
    let snapshot = load_configuration(&store);

    let packets = Arc::new(PacketManager::new(
        Arc::clone(&scheduler),
        Arc::new(SntpTimeSource::new(config.ntp_server.clone())),
        &snapshot,
    ));
    let transport = Arc::new(HttpTransport::new(
        &config.server_url,
        &config.internet_check_address,
    )?);

    let i2c = linux_embedded_hal::I2cdev::new(&config.i2c_bus)?;
    let mut mcu = McuReader::new(I2cBus::new(i2c), config.mcu_address);
    if !mcu.check_connection() {
        warn!("MCU 0x{:02x} not answering, sensor reads will fail until it does", mcu.address());
    }

    let sensors = Arc::new(SensorReader::new(mcu, Arc::clone(&packets), Arc::clone(&scheduler)));
    if let Err(e) = sensors.update_configuration(&snapshot) {
        error!("Failed to start sensor reads: {}", e);
    }

    let synchronizer = Arc::new(Synchronizer::new(
        transport,
        Arc::clone(&scheduler),
        store,
        Arc::clone(&packets),
        sensors,
        snapshot,
    ));
    synchronizer.start().await;

    info!("Initialisation complete");

    loop {
        sleep(Duration::from_secs(ALIVE_INTERVAL_SECS)).await;
        let configuration = synchronizer.current_configuration();
        info!(
            "Alive and kicking ({}, configuration {}, {} sensors, {} packets buffered)",
            synchronizer.state(),
            configuration.checksum,
            configuration.sensors.len(),
            packets.len()
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match AgentConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let scheduler = Arc::new(Scheduler::new());

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        let _ = tx.send(());
    });

    let result = tokio::select! {
        result = run(config, Arc::clone(&scheduler)) => result,
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
            Ok(())
        }
    };

    scheduler.shutdown();
    if let Err(e) = &result {
        error!("Fatal error: {}", e);
    }
    result
}
