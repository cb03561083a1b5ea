//! Tunables for query compilation, locking and backend retries.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only needs to
//! name the values it overrides:
//!
//! ```toml
//! [query]
//! hard_max_limit = 50000
//!
//! [retry]
//! base_wait_ms = 20
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Complete configuration for the storage core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Query compilation and execution options.
    pub query: QueryOptions,
    /// Expected-value-checking and lock options.
    pub locking: LockingOptions,
    /// Backend retry options.
    pub retry: RetryOptions,
}

impl StorageConfig {
    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: StorageConfig =
            toml::from_str(contents).map_err(|err| GraphError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| GraphError::Config(format!("reading {}: {err}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| GraphError::Config(err.to_string()))
    }

    /// Rejects values the executor and query layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.query.hard_max_limit == 0 {
            return Err(GraphError::Config("query.hard_max_limit must be positive".into()));
        }
        if self.retry.base_wait_ms == 0 {
            return Err(GraphError::Config("retry.base_wait_ms must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(GraphError::Config(format!(
                "retry.jitter must be in [0, 1), got {}",
                self.retry.jitter
            )));
        }
        if self.retry.read_wait_ms == 0 || self.retry.write_wait_ms == 0 {
            return Err(GraphError::Config("retry wait times must be positive".into()));
        }
        if self.locking.lock_store_suffix.is_empty() {
            return Err(GraphError::Config("locking.lock_store_suffix must not be empty".into()));
        }
        if self.locking.lock_expiry_ms == 0 {
            return Err(GraphError::Config("locking.lock_expiry_ms must be positive".into()));
        }
        Ok(())
    }

    /// Sets the query options.
    pub fn query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }

    /// Sets the locking options.
    pub fn locking(mut self, locking: LockingOptions) -> Self {
        self.locking = locking;
        self
    }

    /// Sets the retry options.
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }
}

/// Query-layer options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Ceiling for backend limits inflated to compensate for in-memory filtering.
    pub hard_max_limit: usize,
    /// Drop duplicate results when merging partitioned-vertex representatives.
    pub partition_dedup: bool,
    /// Only fan out to representatives in local partitions.
    pub restrict_to_partitions: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            hard_max_limit: 300_000,
            partition_dedup: false,
            restrict_to_partitions: true,
        }
    }
}

impl QueryOptions {
    /// Sets the hard ceiling for adjusted backend limits.
    pub fn hard_max_limit(mut self, limit: usize) -> Self {
        self.hard_max_limit = limit;
        self
    }

    /// Enables or disables deduplication across partition representatives.
    pub fn partition_dedup(mut self, enabled: bool) -> Self {
        self.partition_dedup = enabled;
        self
    }

    /// Restricts or widens partitioned-vertex fan-out.
    pub fn restrict_to_partitions(mut self, enabled: bool) -> Self {
        self.restrict_to_partitions = enabled;
        self
    }
}

/// Locking options for the expected-value-checking manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingOptions {
    /// Appended to a store name to name its locker.
    pub lock_store_suffix: String,
    /// Lease duration of locks held by the local locker.
    pub lock_expiry_ms: u64,
}

impl Default for LockingOptions {
    fn default() -> Self {
        Self {
            lock_store_suffix: "_lock_".into(),
            lock_expiry_ms: 300_000,
        }
    }
}

impl LockingOptions {
    /// Sets the locker name suffix.
    pub fn lock_store_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.lock_store_suffix = suffix.into();
        self
    }

    /// Sets the lock lease in milliseconds.
    pub fn lock_expiry_ms(mut self, ms: u64) -> Self {
        self.lock_expiry_ms = ms;
        self
    }

    /// Lock lease as a [`Duration`].
    pub fn lock_expiry(&self) -> Duration {
        Duration::from_millis(self.lock_expiry_ms)
    }
}

/// Options for [`crate::storage::BackendOperation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Delay before the first retry.
    pub base_wait_ms: u64,
    /// Symmetric multiplicative jitter applied to every wait.
    pub jitter: f64,
    /// Total wait budget for reads; also the expected-value re-read budget.
    pub read_wait_ms: u64,
    /// Total wait budget for writes.
    pub write_wait_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            base_wait_ms: 50,
            jitter: 0.2,
            read_wait_ms: 10_000,
            write_wait_ms: 100_000,
        }
    }
}

impl RetryOptions {
    /// Sets the base delay in milliseconds.
    pub fn base_wait_ms(mut self, ms: u64) -> Self {
        self.base_wait_ms = ms;
        self
    }

    /// Sets the jitter fraction.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the read wait budget in milliseconds.
    pub fn read_wait_ms(mut self, ms: u64) -> Self {
        self.read_wait_ms = ms;
        self
    }

    /// Sets the write wait budget in milliseconds.
    pub fn write_wait_ms(mut self, ms: u64) -> Self {
        self.write_wait_ms = ms;
        self
    }

    /// Base delay as a [`Duration`].
    pub fn base_wait(&self) -> Duration {
        Duration::from_millis(self.base_wait_ms)
    }

    /// Read budget as a [`Duration`].
    pub fn read_wait(&self) -> Duration {
        Duration::from_millis(self.read_wait_ms)
    }

    /// Write budget as a [`Duration`].
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}
