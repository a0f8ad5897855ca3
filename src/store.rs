//! Local persistence of the last accepted remote configuration

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::{ConfigValidationError, StoreError};
use crate::models::ConfigurationSnapshot;

pub trait ConfigurationStore: Send + Sync {
    /// The stored snapshot, or `None` if nothing has been stored yet
    fn load(&self) -> Result<Option<ConfigurationSnapshot>, StoreError>;
    fn save(&self, checksum: &str, payload: &str) -> Result<(), StoreError>;
    fn validate(&self, payload: &str) -> Result<ConfigurationSnapshot, ConfigValidationError>;
}

#[derive(Serialize, Deserialize)]
struct StoredConfiguration {
    checksum: String,
    configuration: serde_json::Value,
}

/// Keeps the configuration in a single JSON file
pub struct FileConfigurationStore {
    path: PathBuf,
}

impl FileConfigurationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigurationStore for FileConfigurationStore {
    fn load(&self) -> Result<Option<ConfigurationSnapshot>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored configuration at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredConfiguration = serde_json::from_str(&contents)?;
        let payload = stored.configuration.to_string();
        let snapshot = self.validate(&payload)?.with_checksum(stored.checksum);
        Ok(Some(snapshot))
    }

    fn save(&self, checksum: &str, payload: &str) -> Result<(), StoreError> {
        let stored = StoredConfiguration {
            checksum: checksum.to_string(),
            configuration: serde_json::from_str(payload)?,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&stored)?)?;
        fs::rename(&tmp, &self.path)?;

        info!(
            "Stored configuration {} at {}",
            checksum,
            self.path.display()
        );
        Ok(())
    }

    fn validate(&self, payload: &str) -> Result<ConfigurationSnapshot, ConfigValidationError> {
        ConfigurationSnapshot::from_payload(payload)
    }
}
