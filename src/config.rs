use log::info;
use std::env;
use std::path::PathBuf;

use crate::utils::parse_address;

const DEFAULT_I2C_BUS: &str = "/dev/i2c-1";
const DEFAULT_MCU_ADDRESS: u8 = 0x04;
const DEFAULT_CONFIG_PATH: &str = "/var/lib/datalogger/configuration.json";
const DEFAULT_NTP_SERVER: &str = "europe.pool.ntp.org:123";
const DEFAULT_INTERNET_CHECK_ADDRESS: &str = "8.8.8.8:53";

/// Process-level settings; everything the server can change lives in the remote configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_url: String,
    pub i2c_bus: String,
    pub mcu_address: u8,
    pub configuration_path: PathBuf,
    pub ntp_server: String,
    pub internet_check_address: String,
}

impl AgentConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("SERVER_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or("SERVER_URL environment variable not set")?;

        let mcu_address = match lookup("MCU_ADDRESS") {
            Some(value) => parse_address(&value)
                .ok_or_else(|| format!("MCU_ADDRESS '{}' is not a valid device address", value))?,
            None => DEFAULT_MCU_ADDRESS,
        };

        let config = AgentConfig {
            server_url: server_url.trim().to_string(),
            i2c_bus: lookup("I2C_BUS").unwrap_or_else(|| DEFAULT_I2C_BUS.to_string()),
            mcu_address,
            configuration_path: lookup("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            ntp_server: lookup("NTP_SERVER").unwrap_or_else(|| DEFAULT_NTP_SERVER.to_string()),
            internet_check_address: lookup("INTERNET_CHECK_ADDRESS")
                .unwrap_or_else(|| DEFAULT_INTERNET_CHECK_ADDRESS.to_string()),
        };

        info!(
            "Server {}, MCU 0x{:02x} on {}",
            config.server_url, config.mcu_address, config.i2c_bus
        );
        Ok(config)
    }
}
