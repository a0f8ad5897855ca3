use serde::{Deserialize, Serialize};

use crate::errors::ConfigValidationError;

const FALLBACK_SEND_INTERVAL_SECS: u64 = 300;
const FALLBACK_MINIMUM_PACKETS: usize = 10;
const FALLBACK_CONFIG_CHECK_INTERVAL_SECS: u64 = 3600;
const DEFAULT_SENSOR_READ_INTERVAL_SECS: u64 = 60;

/// How many bytes a register answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterWidth {
    Narrow,
    Wide,
}

/// One register of a modbus slave proxied by the microcontroller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub slave_address: u8,
    pub register_address: u8,
    pub width: RegisterWidth,
}

fn default_sensor_read_interval() -> u64 {
    DEFAULT_SENSOR_READ_INTERVAL_SECS
}

/// Remote configuration as understood by the datalogger.
///
/// The checksum is not part of the payload itself; it is the server-provided
/// digest the payload was fetched under, attached with [`with_checksum`].
///
/// [`with_checksum`]: ConfigurationSnapshot::with_checksum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSnapshot {
    #[serde(skip)]
    pub checksum: String,
    pub send_interval_seconds: u64,
    pub minimum_packets_to_send: usize,
    pub config_check_interval_seconds: u64,
    #[serde(default = "default_sensor_read_interval")]
    pub sensor_read_interval_seconds: u64,
    #[serde(default)]
    pub max_buffered_packets: Option<usize>,
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

impl ConfigurationSnapshot {
    /// Configuration used until a remote one has been stored
    pub fn fallback() -> Self {
        Self {
            checksum: String::new(),
            send_interval_seconds: FALLBACK_SEND_INTERVAL_SECS,
            minimum_packets_to_send: FALLBACK_MINIMUM_PACKETS,
            config_check_interval_seconds: FALLBACK_CONFIG_CHECK_INTERVAL_SECS,
            sensor_read_interval_seconds: DEFAULT_SENSOR_READ_INTERVAL_SECS,
            max_buffered_packets: None,
            sensors: Vec::new(),
        }
    }

    /// Parse and structurally validate a raw configuration payload
    pub fn from_payload(payload: &str) -> Result<Self, ConfigValidationError> {
        let snapshot: ConfigurationSnapshot = serde_json::from_str(payload)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = checksum.into();
        self
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.send_interval_seconds == 0 {
            return Err(invalid("sendIntervalSeconds", "must be greater than zero"));
        }
        if self.config_check_interval_seconds == 0 {
            return Err(invalid(
                "configCheckIntervalSeconds",
                "must be greater than zero",
            ));
        }
        if self.sensor_read_interval_seconds == 0 {
            return Err(invalid(
                "sensorReadIntervalSeconds",
                "must be greater than zero",
            ));
        }
        if self.max_buffered_packets == Some(0) {
            return Err(invalid("maxBufferedPackets", "must be greater than zero"));
        }
        if let Some(index) = self.sensors.iter().position(|s| s.kind.trim().is_empty()) {
            return Err(invalid(
                "sensors",
                format!("entry {} has an empty type", index),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PAYLOAD: &str = r#"{
        "sendIntervalSeconds": 120,
        "minimumPacketsToSend": 5,
        "configCheckIntervalSeconds": 600,
        "sensorReadIntervalSeconds": 30,
        "maxBufferedPackets": 1000,
        "sensors": [
            {"type": "windspeed", "slaveAddress": 1, "registerAddress": 4, "width": "wide"},
            {"type": "humidity", "slaveAddress": 2, "registerAddress": 0, "width": "narrow"}
        ]
    }"#;

    #[test]
    fn parses_complete_payload() {
        let snapshot = ConfigurationSnapshot::from_payload(FULL_PAYLOAD).unwrap();
        assert_eq!(snapshot.send_interval_seconds, 120);
        assert_eq!(snapshot.minimum_packets_to_send, 5);
        assert_eq!(snapshot.config_check_interval_seconds, 600);
        assert_eq!(snapshot.sensor_read_interval_seconds, 30);
        assert_eq!(snapshot.max_buffered_packets, Some(1000));
        assert_eq!(snapshot.sensors.len(), 2);
        assert_eq!(snapshot.sensors[0].kind, "windspeed");
        assert_eq!(snapshot.sensors[0].width, RegisterWidth::Wide);
        assert!(snapshot.checksum.is_empty());
    }

    #[test]
    fn optional_fields_take_defaults() {
        let payload = r#"{"sendIntervalSeconds": 60, "minimumPacketsToSend": 0, "configCheckIntervalSeconds": 60}"#;
        let snapshot = ConfigurationSnapshot::from_payload(payload).unwrap();
        assert_eq!(snapshot.sensor_read_interval_seconds, 60);
        assert_eq!(snapshot.max_buffered_packets, None);
        assert!(snapshot.sensors.is_empty());
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let payload = r#"{"sendIntervalSeconds": 60, "configCheckIntervalSeconds": 60}"#;
        let err = ConfigurationSnapshot::from_payload(payload).unwrap_err();
        assert!(matches!(err, ConfigValidationError::Malformed(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let payload = r#"{"sendIntervalSeconds": 0, "minimumPacketsToSend": 1, "configCheckIntervalSeconds": 60}"#;
        let err = ConfigurationSnapshot::from_payload(payload).unwrap_err();
        assert!(matches!(
            err,
            ConfigValidationError::Invalid {
                field: "sendIntervalSeconds",
                ..
            }
        ));
    }

    #[test]
    fn not_json_is_malformed() {
        assert!(ConfigurationSnapshot::from_payload("<html>").is_err());
    }

    #[test]
    fn with_checksum_keeps_settings() {
        let snapshot = ConfigurationSnapshot::fallback().with_checksum("abc");
        assert_eq!(snapshot.checksum, "abc");
        assert_eq!(snapshot.send_interval_seconds, FALLBACK_SEND_INTERVAL_SECS);
    }
}
