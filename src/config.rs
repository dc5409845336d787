//! Configuration for varstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a varstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all frame files.
    /// Internal structure:
    ///   {root_dir}/
    ///     ├── {key}.var          (primary frame)
    ///     ├── {key}.var.bak      (rotated backup frame)
    ///     └── {key}.{id}.tmp     (transient write scratch, removed before any call returns)
    pub root_dir: PathBuf,

    /// Minimum free bytes on the storage volume. Saves abort with `DiskFull`
    /// before touching any file when the volume reports less than this.
    pub min_free_bytes: u64,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Max number of cached records before eviction kicks in
    pub cache_capacity: usize,

    /// Idle window after which an unaccessed cache entry expires
    pub cache_idle_timeout: Duration,

    // -------------------------------------------------------------------------
    // Shutdown Configuration
    // -------------------------------------------------------------------------
    /// Bounded wait for in-flight writes during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./varstore_data"),
            min_free_bytes: 4096,
            cache_capacity: 2000,
            cache_idle_timeout: Duration::from_secs(15 * 60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the root directory (holds every frame file)
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the free-space floor (in bytes) for the disk-full guard
    pub fn min_free_bytes(mut self, bytes: u64) -> Self {
        self.config.min_free_bytes = bytes;
        self
    }

    /// Set the maximum number of cached records
    pub fn cache_capacity(mut self, count: usize) -> Self {
        self.config.cache_capacity = count;
        self
    }

    /// Set the idle expiry window for cache entries
    pub fn cache_idle_timeout(mut self, window: Duration) -> Self {
        self.config.cache_idle_timeout = window;
        self
    }

    /// Set the bounded shutdown drain timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
