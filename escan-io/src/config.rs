//! Load configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use escan_parse::XrfConfig;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Options controlling how [`ScanLoader`](crate::ScanLoader) reads files.
///
/// Every field has a default, so a JSON document only needs the keys it
/// changes:
///
/// ```json
/// { "use_cache": false, "xrf": { "energy_channels": 4096 } }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Read and write the sibling cache file.
    pub use_cache: bool,
    /// Read the `.fullxrf` sidecar when one exists.
    pub read_full_xrf: bool,
    /// Deflate level (0-9) for cache datasets, `None` for uncompressed.
    pub cache_compression: Option<u8>,
    /// Sidecar reader settings.
    pub xrf: XrfConfig,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            read_full_xrf: true,
            cache_compression: Some(5),
            xrf: XrfConfig::default(),
        }
    }
}

impl LoadConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// holds out-of-range values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string is not valid JSON or holds
    /// out-of-range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a deflate level above 9 or zero
    /// energy channels.
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.cache_compression {
            if level > 9 {
                return Err(Error::InvalidConfig(format!(
                    "cache_compression must be 0-9, got {level}"
                )));
            }
        }
        if self.xrf.energy_channels == 0 {
            return Err(Error::InvalidConfig(
                "xrf.energy_channels must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
