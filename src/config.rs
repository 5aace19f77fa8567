use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{ResflowError, Result};

/// Default level timeout, 5 minutes.
pub const DEFAULT_LEVEL_TIMEOUT: u64 = 5 * 60 * 1000;
/// Default timeout for a single resource step, 60 seconds.
pub const DEFAULT_RESOURCE_TIMEOUT: u64 = 60 * 1000;
/// Default interval between completion-marker polls.
pub const DEFAULT_POLL_INTERVAL: u64 = 100;
/// Default OpenAI-compatible endpoint (a local Ollama).
pub const DEFAULT_MODEL_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// maximum workers per level, defaults to host parallelism
    pub max_workers: i64,
    /// level timeout in milliseconds
    pub level_timeout: i64,
    /// default per-resource timeout in milliseconds
    pub resource_timeout: i64,
    /// completion-marker poll interval in milliseconds
    pub poll_interval: i64,
    /// route gate errors through the fatal policy instead of raising them
    pub api_server_mode: bool,
    /// directory receiving per-resource output files
    pub files_dir: Option<PathBuf>,
    /// number of async worker threads for an owned runtime, range [1, 32768)
    pub async_worker_thread_number: u16,
    /// model endpoint config
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// base url of an OpenAI-compatible api
    pub base_url: String,
    /// bearer token, if the endpoint needs one
    pub api_key: Option<String>,
    /// request timeout in milliseconds
    pub timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get() as i64,
            level_timeout: DEFAULT_LEVEL_TIMEOUT as i64,
            resource_timeout: DEFAULT_RESOURCE_TIMEOUT as i64,
            poll_interval: DEFAULT_POLL_INTERVAL as i64,
            api_server_mode: false,
            files_dir: None,
            async_worker_thread_number: 16,
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            api_key: None,
            timeout: 600 * 1000,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|err| ResflowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), err)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str).map_err(|err| ResflowError::Config(format!("failed to parse the toml str: {}", err)))?;
        Ok(config.normalized())
    }

    /// Replaces non-positive knobs with their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Config::default();
        if self.max_workers <= 0 {
            self.max_workers = defaults.max_workers;
        }
        if self.level_timeout <= 0 {
            self.level_timeout = defaults.level_timeout;
        }
        if self.resource_timeout <= 0 {
            self.resource_timeout = defaults.resource_timeout;
        }
        if self.poll_interval <= 0 {
            self.poll_interval = defaults.poll_interval;
        }
        if self.async_worker_thread_number == 0 {
            self.async_worker_thread_number = defaults.async_worker_thread_number;
        }
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.max(1) as usize
    }

    pub fn level_timeout(&self) -> Duration {
        Duration::from_millis(self.level_timeout.max(1) as u64)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_timeout.max(1) as u64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval.max(1) as u64)
    }
}
