//! Storage configuration

use super::defaults::*;
use crate::error::{NetplaneError, NetplaneResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory path
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            db_file: DEFAULT_DB_FILE.to_string(),
        }
    }
}

impl StorageConfig {
    /// Load from environment variables
    pub fn from_env() -> NetplaneResult<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("NETPLANE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(file) = std::env::var("NETPLANE_DB_FILE") {
            config.db_file = file;
        }

        Ok(config)
    }

    /// Full path of the shared store
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    /// Validate configuration
    pub fn validate(&self) -> NetplaneResult<()> {
        if self.db_file.trim().is_empty() {
            return Err(NetplaneError::configuration(
                "storage.db_file",
                "database file name cannot be empty",
            ));
        }
        Ok(())
    }
}
