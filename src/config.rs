//! Project configuration loaded from YAML.
//!
//! ```yaml
//! legend:
//!   - range: [0, 5]
//!     color: [[255, 255, 255], [254, 217, 118]]
//! raster:
//!   max_width: 3000
//!   year: 2020
//! upload:
//!   endpoint: https://tiles.example.org/uploads
//!   owner: humdata
//! ```
//!
//! Everything except `legend` has a default.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::legend::{Legend, LegendEntry};
use crate::resample::DEFAULT_MAX_WIDTH;
use crate::source::DEFAULT_SOURCE_URL;
use crate::upload::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_STATUS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub legend: Vec<LegendEntry>,
    #[serde(default)]
    pub raster: RasterConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub max_width: usize,
    pub year: u16,
    /// URL template with `{ISO}`, `{iso}` and `{year}` placeholders.
    pub source_url: String,
    pub download_timeout_secs: u64,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            year: 2020,
            source_url: DEFAULT_SOURCE_URL.to_string(),
            download_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: String,
    /// Account prefix of generated tileset ids.
    pub owner: String,
    pub retry_status: u16,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mapbox.com/uploads/v1/humdata".to_string(),
            owner: "humdata".to_string(),
            retry_status: DEFAULT_RETRY_STATUS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: 5,
            request_timeout_secs: 600,
        }
    }
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_status: self.retry_status,
            max_retries: self.max_retries,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

impl ProjectConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ProjectConfig =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if config.raster.max_width == 0 {
            return Err(Error::Config("raster.max_width must be positive".to_string()));
        }
        Ok(config)
    }

    /// Validates the legend; an invalid legend fails the whole run.
    pub fn legend(&self) -> Result<Legend> {
        Ok(Legend::new(self.legend.clone())?)
    }
}
