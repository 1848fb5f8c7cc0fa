use efes_core::{EfesError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub listen_address: String,
    pub shutdown_timeout_ms: u64,
    pub pending_file_ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8001".to_string(),
            shutdown_timeout_ms: 3_000,
            pending_file_ttl_ms: 86_400_000,
            sweep_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "efes.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub tracker_url: String,
    pub chunk_size: usize,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tracker_url: "http://127.0.0.1:8001".to_string(),
            chunk_size: efes_core::DEFAULT_CHUNK_SIZE,
            timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Defaults overlaid by the file-supplied values, then by EFES_*
    /// environment variables.
    pub fn from_file(path: &str) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Config::default())
            .map_err(|e| EfesError::Config(e.to_string()))?;

        let settings = ::config::Config::builder()
            .add_source(defaults)
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("EFES").separator("__"))
            .build()
            .map_err(|e| EfesError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| EfesError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn core_client_config(&self) -> efes_core::ClientConfig {
        efes_core::ClientConfig {
            tracker_url: self.client.tracker_url.clone(),
            chunk_size: self.client.chunk_size,
            timeout: Duration::from_millis(self.client.timeout_ms),
        }
    }
}
