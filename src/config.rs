//! Configuration module for the B3 market data loader
//!
//! Every section is optional in the YAML file and falls back to the defaults
//! below. Command line flags override file values in `main`.

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::loader::{
    LoadOptions, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENT_FILES, DEFAULT_MAX_IN_FLIGHT_BATCHES,
    DEFAULT_PAYLOAD_EXTENSION, DEFAULT_TIMEZONE,
};

/// Trade store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory of the sled database
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./db/b3-market-data".to_string(),
        }
    }
}

/// Loader tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Trades per batch submitted to the store
    pub batch_size: usize,
    /// Archives processed at the same time
    pub concurrent_files: usize,
    /// Batch submissions running at the same time across all archives
    pub max_in_flight_batches: usize,
    /// Extension of the payload member inside each archive (case-insensitive)
    pub payload_extension: String,
    /// IANA name of the timezone entry times are recorded in
    pub timezone: String,
    /// Optional upper bound on a single batch submission
    pub flush_timeout_secs: Option<u64>,
    /// Refresh period of the terminal progress display
    pub progress_update_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrent_files: DEFAULT_CONCURRENT_FILES,
            max_in_flight_batches: DEFAULT_MAX_IN_FLIGHT_BATCHES,
            payload_extension: DEFAULT_PAYLOAD_EXTENSION.to_string(),
            timezone: DEFAULT_TIMEZONE.name().to_string(),
            flush_timeout_secs: None,
            progress_update_ms: 200,
        }
    }
}

impl LoaderConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Unknown timezone {:?}: {}", self.timezone, e))
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_ms)
    }

    /// Typed options for `Loader`
    pub fn options(&self) -> Result<LoadOptions> {
        Ok(LoadOptions {
            batch_size: self.batch_size,
            concurrent_files: self.concurrent_files,
            max_in_flight_batches: self.max_in_flight_batches,
            payload_extension: self.payload_extension.clone(),
            timezone: self.timezone()?,
            flush_timeout: self.flush_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub loader: LoaderConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config YAML")?;

        Ok(config)
    }

    /// Reject values the loader cannot run with
    pub fn validate(&self) -> Result<()> {
        let loader = &self.loader;
        if loader.batch_size == 0 {
            bail!("loader.batch_size must be positive");
        }
        if loader.concurrent_files == 0 {
            bail!("loader.concurrent_files must be positive");
        }
        if loader.max_in_flight_batches == 0 {
            bail!("loader.max_in_flight_batches must be positive");
        }
        if loader.payload_extension.trim().is_empty() {
            bail!("loader.payload_extension must not be empty");
        }
        loader.timezone()?;
        if self.store.path.trim().is_empty() {
            bail!("store.path must not be empty");
        }
        Ok(())
    }
}
