//! src/dataloader/config.rs
//!
//! Configuration for DataLoader behaviour
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .num_workers(4)
//!     .prefetch_factor(2)
//!     .timeout(Duration::from_secs(60))
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: More workers can improve throughput but increase memory usage
//! - `prefetch_factor`: Higher values reduce GPU starvation but use more memory

use anyhow::{ensure, Result};
use std::time::Duration;

/// Configuration for DataLoader
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of parallel workers (0 = load on the consumer thread)
    pub num_workers: usize,
    /// Number of batches in flight per worker (must be >0 when using workers)
    pub prefetch_factor: usize,
    /// Maximum time to wait for the next batch from workers.
    /// If exceeded, returns an error (assuming workers are stuck). Default: 30s
    pub timeout: Duration,
    /// How often idle workers check for the shutdown signal.
    /// Not an error timeout - just a polling interval. Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            prefetch_factor: 2,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.num_workers == 0 || self.prefetch_factor > 0,
            "Prefetch factor must be > 0 when using {} workers",
            self.num_workers
        );
        ensure!(
            !self.timeout.is_zero(),
            "Loader timeout must be greater than zero"
        );
        ensure!(
            !self.poll_interval.is_zero(),
            "Worker poll interval must be greater than zero"
        );
        Ok(())
    }

    /// Upper bound on batches submitted to workers but not yet yielded.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.num_workers * self.prefetch_factor
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Debug, Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the number of workers
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Set the prefetch factor.
    /// Higher values help prevent GPU starvation but use more memory.
    pub fn prefetch_factor(mut self, factor: usize) -> Self {
        self.config.prefetch_factor = factor;
        self
    }

    /// Set the timeout for receiving a batch.
    ///
    /// - Too low: May fail batches during legitimate heavy processing
    /// - Too high: Delays detection of stuck workers.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the worker polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

#[cfg(test)]
mod loader_config_tests {
    use super::*;

    #[test]
    fn defaults_are_single_threaded() {
        let config = LoaderConfig::default();
        assert_eq!(config.num_workers, 0);
        assert_eq!(config.prefetch_factor, 2);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_prefetch_only_matters_with_workers() {
        let inline = LoaderConfig::builder().prefetch_factor(0).build();
        assert!(inline.validate().is_ok());

        let threaded = LoaderConfig::builder()
            .num_workers(2)
            .prefetch_factor(0)
            .build();
        assert!(threaded.validate().is_err());
    }

    #[test]
    fn builder_sets_every_field() {
        let config = LoaderConfig::builder()
            .num_workers(3)
            .prefetch_factor(4)
            .timeout(Duration::from_secs(1))
            .poll_interval(Duration::from_millis(5))
            .build();
        assert_eq!(config.max_in_flight(), 12);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }
}
