use crate::error::{FabricError, FabricResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration surface consumed by the dispatch core.
///
/// All values carry documented defaults and deserialize from TOML; a subset
/// can additionally be overridden through `TASKFABRIC_*` environment
/// variables via [`DispatchConfig::apply_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between agent heartbeats. Default 30.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Seconds without a heartbeat before an agent is marked offline. Default 90.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Capacity fraction below which an agent has no headroom. Default 0.2.
    #[serde(default = "default_pause_threshold")]
    pub pause_threshold: f64,
    /// Seconds between resume-cycle polls. Default 10.
    #[serde(default = "default_pause_poll_interval")]
    pub pause_poll_interval_secs: u64,
    /// Seconds to back off after a resume cycle fails as a whole. Default 30.
    #[serde(default = "default_pause_error_backoff")]
    pub pause_error_backoff_secs: u64,
    /// Fixed GPU VRAM reserve (MiB) in the capacity fraction denominator. Default 2048.
    #[serde(default = "default_gpu_reserve")]
    pub gpu_reserve_mb: u64,
    /// Idempotency cache entry time-to-live in seconds. Default 300.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Idempotency cache capacity. Default 1000.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Maximum dispatch retries after the initial attempt. Default 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hours of routing history considered for the recent-context bonus. Default 4.
    #[serde(default = "default_context_lookback")]
    pub context_lookback_hours: u64,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    90
}

fn default_pause_threshold() -> f64 {
    0.2
}

fn default_pause_poll_interval() -> u64 {
    10
}

fn default_pause_error_backoff() -> u64 {
    30
}

fn default_gpu_reserve() -> u64 {
    2048
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_context_lookback() -> u64 {
    4
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            pause_threshold: default_pause_threshold(),
            pause_poll_interval_secs: default_pause_poll_interval(),
            pause_error_backoff_secs: default_pause_error_backoff(),
            gpu_reserve_mb: default_gpu_reserve(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            max_retries: default_max_retries(),
            context_lookback_hours: default_context_lookback(),
        }
    }
}

impl DispatchConfig {
    /// Parses a config from a TOML string, applying field defaults for any
    /// omitted values, then validates it.
    pub fn from_toml_str(raw: &str) -> FabricResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| FabricError::Config(format!("invalid config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> FabricResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Applies `TASKFABRIC_*` environment overrides on top of the current
    /// values. Unparseable values are rejected rather than ignored.
    pub fn apply_env(mut self) -> FabricResult<Self> {
        if let Some(v) = read_env("TASKFABRIC_PAUSE_THRESHOLD")? {
            self.pause_threshold = v;
        }
        if let Some(v) = read_env("TASKFABRIC_PAUSE_POLL_INTERVAL_SECS")? {
            self.pause_poll_interval_secs = v;
        }
        if let Some(v) = read_env("TASKFABRIC_HEARTBEAT_INTERVAL_SECS")? {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = read_env("TASKFABRIC_HEARTBEAT_TIMEOUT_SECS")? {
            self.heartbeat_timeout_secs = v;
        }
        if let Some(v) = read_env("TASKFABRIC_MAX_RETRIES")? {
            self.max_retries = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> FabricResult<()> {
        if !(0.0..=1.0).contains(&self.pause_threshold) {
            return Err(FabricError::Config(format!(
                "pause_threshold {} outside [0, 1]",
                self.pause_threshold
            )));
        }
        if self.heartbeat_timeout_secs <= self.heartbeat_interval_secs {
            return Err(FabricError::Config(
                "heartbeat_timeout_secs must exceed heartbeat_interval_secs".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(FabricError::Config(
                "cache_max_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout as a chrono duration (compared against row timestamps).
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_secs as i64)
    }

    /// Resume-cycle poll interval as a [`Duration`].
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pause_poll_interval_secs)
    }

    /// Resume-cycle error backoff as a [`Duration`].
    pub fn pause_error_backoff(&self) -> Duration {
        Duration::from_secs(self.pause_error_backoff_secs)
    }

    /// Idempotency cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Context-lookback window as a chrono duration.
    pub fn context_lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.context_lookback_hours as i64)
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> FabricResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| FabricError::Config(format!("invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}
