use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_NODE: &str = "local";
pub const DEFAULT_NODE_CAPACITY: usize = 10;
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 64;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Coordinator configuration.
///
/// Every field has a default, so a partial (or missing) `conductor.toml`
/// is always valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Ceiling on simultaneously running task executions.
    pub max_concurrent_tasks: usize,
    /// Period of the coordinator's auto-restart supervision loop.
    pub health_check_interval_ms: u64,
    /// Period of the health monitor's background refresh.
    pub monitor_interval_ms: u64,
    /// Unit of the linear retry backoff (`base * retries`).
    pub retry_base_delay_ms: u64,
    /// Node that agents join when none is given.
    pub default_node: String,
    /// Nominal capacity recorded on lazily created nodes.
    pub node_capacity: usize,
    /// Bound on subscribers per message bus topic.
    pub max_subscribers_per_topic: usize,
    /// Buffer size of broadcast event channels.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            default_node: DEFAULT_NODE.to_string(),
            node_capacity: DEFAULT_NODE_CAPACITY,
            max_subscribers_per_topic: DEFAULT_MAX_SUBSCRIBERS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Load from `~/.conductor/conductor.toml`, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Config::load path={}", path.display());
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            "Config loaded: max_concurrent_tasks={}, health_check_interval_ms={}, default_node={}",
            config.max_concurrent_tasks, config.health_check_interval_ms, config.default_node
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!("Creating config directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.health_check_interval_ms == 0 || self.monitor_interval_ms == 0 {
            return Err(Error::Validation(
                "health intervals must be non-zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Validation(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
