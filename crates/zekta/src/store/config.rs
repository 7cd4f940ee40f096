//! Series configuration file (`zekta.config.json`).

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZektaError};

/// Name of the config file inside a series directory.
pub const CONFIG_FILE_NAME: &str = "zekta.config.json";

/// Config file format version this build reads and writes.
pub const CONFIG_VERSION: u32 = 1;

/// Persistent per-series settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesConfig {
    /// Config file format version.
    pub version: u32,
    /// Fixed byte length of every stored value.
    pub value_byte_length: usize,
}

impl SeriesConfig {
    /// Creates a current-version config for the given value byte length.
    pub fn new(value_byte_length: usize) -> Self {
        Self {
            version: CONFIG_VERSION,
            value_byte_length,
        }
    }

    /// Reads the config file from a series directory.
    ///
    /// Returns `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ZektaError::UnsupportedVersion` for any version other than
    /// [`CONFIG_VERSION`], `ZektaError::BadConfig` for malformed JSON, and
    /// `ZektaError::IoError` for other filesystem failures.
    pub async fn load(dir: &Path) -> Result<Option<SeriesConfig>> {
        let bytes = match tokio::fs::read(dir.join(CONFIG_FILE_NAME)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let config: SeriesConfig = serde_json::from_slice(&bytes)?;
        if config.version != CONFIG_VERSION {
            return Err(ZektaError::UnsupportedVersion(config.version));
        }
        Ok(Some(config))
    }

    /// Writes the config file into a series directory, creating the
    /// directory if needed.
    pub async fn store(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(dir.join(CONFIG_FILE_NAME), bytes).await?;
        Ok(())
    }
}
