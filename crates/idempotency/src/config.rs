//! Configuration for the idempotency layer.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::coordinator::{DEFAULT_TTL, ExecuteOptions, SuccessPolicy};
use crate::store::cache::DEFAULT_CACHE_CAPACITY;
use crate::store::{CacheStore, IdempotencyStore, MemoryStore};
use crate::sweeper::DEFAULT_SWEEP_INTERVAL;

/// Errors found while validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("default_ttl_ms must be greater than zero")]
    ZeroTtl,

    #[error("sweep_interval_ms must be greater than zero")]
    ZeroSweepInterval,

    #[error("cache_capacity must be greater than zero")]
    ZeroCacheCapacity,
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// [`MemoryStore`]: a locked map.
    #[default]
    Memory,
    /// [`CacheStore`]: a capacity-limited cache with native expiry.
    Cache,
}

/// Idempotency settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// TTL applied when the caller does not pass one.
    #[serde(rename = "default_ttl_ms", with = "duration_ms", default = "default_ttl")]
    pub default_ttl: Duration,

    /// What to do with a claim after the action succeeds.
    #[serde(default)]
    pub on_success: SuccessPolicy,

    /// Run the background sweep.
    #[serde(default = "default_sweep_enabled")]
    pub sweep_enabled: bool,

    /// Period of the background sweep.
    #[serde(
        rename = "sweep_interval_ms",
        with = "duration_ms",
        default = "default_sweep_interval"
    )]
    pub sweep_interval: Duration,

    #[serde(default)]
    pub backend: StoreBackend,

    /// Maximum entries for the cache backend; new keys are refused once
    /// it is reached.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            on_success: SuccessPolicy::default(),
            sweep_enabled: default_sweep_enabled(),
            sweep_interval: default_sweep_interval(),
            backend: StoreBackend::default(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl IdempotencyConfig {
    /// Check the configuration for values the runtime cannot honor.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.backend == StoreBackend::Cache && self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        Ok(())
    }

    /// Default per-call options.
    #[must_use]
    pub const fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            ttl: self.default_ttl,
            on_success: self.on_success,
        }
    }

    /// Build the configured store.
    #[must_use]
    pub fn build_store(&self, clock: Arc<dyn Clock>) -> Arc<dyn IdempotencyStore> {
        match self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::with_clock(clock)),
            StoreBackend::Cache => Arc::new(CacheStore::with_clock(self.cache_capacity, clock)),
        }
    }
}

const fn default_ttl() -> Duration {
    DEFAULT_TTL
}

const fn default_sweep_enabled() -> bool {
    true
}

const fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

const fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

/// Serialization helper for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
