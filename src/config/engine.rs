//! Allocation, pool and remote source tuning.

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

use crate::service::retry::RetryPolicy;

/// Sequential allocation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    /// Sequence numbers reserved per durable counter advance. 1 disables blocks.
    #[serde(default = "default_block_size")]
    pub block_size: u32,

    /// Compare-and-swap attempts before `AllocationTimeout`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff after a conflict, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff cap, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_block_size() -> u32 {
    1
}

const fn default_max_attempts() -> u32 {
    10
}

const fn default_initial_backoff_ms() -> u64 {
    2
}

const fn default_max_backoff_ms() -> u64 {
    100
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl AllocationConfig {
    /// Retry budget for counter contention.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::Message(
                "allocation.block_size cannot be 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Message(
                "allocation.max_attempts cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool reservation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Lifetime of an uncommitted reservation, in seconds.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    /// Interval between expiry sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

const fn default_reservation_ttl_secs() -> u64 {
    300
}

const fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: default_reservation_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl PoolConfig {
    /// Reservation lifetime.
    #[must_use]
    pub const fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    /// Sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reservation_ttl_secs == 0 {
            return Err(ConfigError::Message(
                "pool.reservation_ttl_secs cannot be 0".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "pool.sweep_interval_secs cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Remote source client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Timeout of one synchronous fetch, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Buffered identifiers below which a background refill starts.
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,

    /// Fetch attempts per synchronous fetch.
    #[serde(default = "default_remote_max_attempts")]
    pub max_attempts: u32,

    /// First backoff after a failed fetch, in milliseconds.
    #[serde(default = "default_remote_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff cap, in milliseconds.
    #[serde(default = "default_remote_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

const fn default_request_timeout_ms() -> u64 {
    5_000
}

const fn default_low_water_mark() -> usize {
    10
}

const fn default_remote_max_attempts() -> u32 {
    3
}

const fn default_remote_initial_backoff_ms() -> u64 {
    100
}

const fn default_remote_max_backoff_ms() -> u64 {
    2_000
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_cooldown_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            low_water_mark: default_low_water_mark(),
            max_attempts: default_remote_max_attempts(),
            initial_backoff_ms: default_remote_initial_backoff_ms(),
            max_backoff_ms: default_remote_max_backoff_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl RemoteConfig {
    /// Timeout of one synchronous fetch.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Open-circuit cooldown.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Retry budget for transient fetch failures.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "remote.request_timeout_ms cannot be 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Message(
                "remote.max_attempts cannot be 0".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "remote.failure_threshold cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub(super) fn validate(
    allocation: &AllocationConfig,
    pool: &PoolConfig,
    remote: &RemoteConfig,
) -> Result<(), ConfigError> {
    allocation.validate()?;
    pool.validate()?;
    remote.validate()
}
