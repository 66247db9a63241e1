use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning knobs for [`StorageManager`](crate::StorageManager).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Workers writing finalized blobs during `advance_to`.
    pub advance_workers: usize,
    /// Workers downloading expected metadata from the ledger.
    pub meta_download_workers: usize,
    /// Slots requested from the ledger per metadata batch.
    pub meta_batch_size: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            advance_workers: 16,
            meta_download_workers: 32,
            meta_batch_size: 8000,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.advance_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "advance_workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.meta_download_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "meta_download_workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.meta_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "meta_batch_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Parse and validate a TOML document. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}
