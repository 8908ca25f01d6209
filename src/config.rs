use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Used to configure a pool
/// # Example
///
/// ```
/// use jobpool::config::PoolConfig;
///
/// let config = PoolConfig::from_json(r#"{ "name": "loader", "size": 4 }"#).unwrap();
/// assert_eq!(config.size, 4);
/// assert!(config.lazy_start);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// prefix of every worker thread name
    pub name: String,
    pub size: usize,
    /// defer starting the workers until the first task is added
    pub lazy_start: bool,
    /// idle workers and waiters poll at this interval
    pub sleep_ms: u64,
}

impl PoolConfig {
    pub const DEFAULT_NUM_THREADS: usize = 10;
    pub const DEFAULT_SLEEP_MS: u64 = 10;

    pub fn new(name: &str, size: usize) -> Self {
        PoolConfig {
            name: name.to_owned(),
            size,
            ..PoolConfig::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: PoolConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        PoolConfig::from_json(&json)
    }

    pub fn with_lazy_start(mut self, lazy_start: bool) -> Self {
        self.lazy_start = lazy_start;
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep_ms = sleep.as_millis() as u64;
        self
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::from(ErrorKind::Config(
                "pool size must be at least 1".to_owned(),
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            name: String::new(),
            size: PoolConfig::DEFAULT_NUM_THREADS,
            lazy_start: true,
            sleep_ms: PoolConfig::DEFAULT_SLEEP_MS,
        }
    }
}
