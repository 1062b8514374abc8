//! Scheduler configuration.
//!
//! Environment-driven, with sane defaults for local development. The polling
//! interval is clamped to a safe range so a misconfigured scheduler cannot
//! saturate the shared store.

use crate::error::{Result, TaskManagerError};

/// Lower bound on the polling interval, milliseconds.
pub const INTERVAL_MIN_MS: u64 = 10;
/// Upper bound on the polling interval, milliseconds.
pub const INTERVAL_MAX_MS: u64 = 10_000;
/// Default polling interval, milliseconds.
pub const INTERVAL_DEFAULT_MS: u64 = 250;
/// Default bound on concurrently dispatched scheduling attempts per process.
pub const MAX_ACTIVE_TASKS_DEFAULT: usize = 10;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub redis_url: String,
    pub database_url: String,
    /// Redis key namespace; lets test and production schedulers share an
    /// instance without touching each other's keys
    pub namespace: String,
    /// Delay between scheduling-loop iterations, milliseconds
    pub interval_ms: u64,
    /// Bound on concurrently dispatched scheduling attempts
    pub max_active_tasks: usize,
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
    pub database_max_connections: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            database_url: "postgresql://localhost/taskcycle_development".to_string(),
            namespace: "taskcycle".to_string(),
            interval_ms: INTERVAL_DEFAULT_MS,
            max_active_tasks: MAX_ACTIVE_TASKS_DEFAULT,
            event_capacity: 1024,
            database_max_connections: 10,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(namespace) = std::env::var("TASKCYCLE_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(interval) = std::env::var("TASKCYCLE_INTERVAL_MS") {
            config.interval_ms = interval.parse().map_err(|e| {
                TaskManagerError::Configuration(format!("Invalid interval_ms: {e}"))
            })?;
        }
        if let Ok(max_active) = std::env::var("TASKCYCLE_MAX_ACTIVE_TASKS") {
            config.max_active_tasks = max_active.parse().map_err(|e| {
                TaskManagerError::Configuration(format!("Invalid max_active_tasks: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_active_tasks == 0 {
            return Err(TaskManagerError::Configuration(
                "max_active_tasks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Polling interval clamped to `[INTERVAL_MIN_MS, INTERVAL_MAX_MS]`.
    pub fn clamped_interval_ms(&self) -> u64 {
        self.interval_ms.clamp(INTERVAL_MIN_MS, INTERVAL_MAX_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clamped_interval_ms(), INTERVAL_DEFAULT_MS);
    }

    #[test]
    fn interval_is_clamped() {
        let mut config = SchedulerConfig::default();
        config.interval_ms = 1;
        assert_eq!(config.clamped_interval_ms(), INTERVAL_MIN_MS);
        config.interval_ms = 60_000;
        assert_eq!(config.clamped_interval_ms(), INTERVAL_MAX_MS);
    }

    #[test]
    fn zero_max_active_tasks_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.max_active_tasks = 0;
        assert!(config.validate().is_err());
    }
}
