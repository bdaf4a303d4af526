//! src/config.rs
//!
//! Batching configuration, validated once at construction and immutable for
//! the rest of the run.
//!
//! Example:
//! ```ignore
//! let config = BucketingConfig::builder()
//!     .max_total_input_units(62_000)
//!     .max_batch_elements(24)
//!     .rng_store_path_template("/data/run-7/rng-{worker}")
//!     .build()?;
//! let sampler = config.training_sampler(lengths, WorkerId::from_index(0), config.rng_store()?)?;
//! ```

use crate::dataloader::LoaderConfig;
use crate::error::BatchingError;
use crate::lengths::LengthIndex;
use crate::rng_store::{
    FileRngStore, InMemoryRngStore, RngStateStore, SeedStream, WorkerId, DEFAULT_SEED,
    WORKER_PLACEHOLDER,
};
use crate::sampler::{CapacityBudget, DynamicBucketSampler, SortedBatchSampler};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Knobs for both samplers and the RNG store.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketingConfig {
    /// Batch size of the fixed-size validation sampler (>= 2).
    pub batch_size_fixed: usize,
    pub max_total_input_units: usize,
    pub max_total_output_units: usize,
    pub max_batch_elements: usize,
    /// Chunk size inside which shuffling is confined.
    pub advance_window_size: usize,
    pub shuffle: bool,
    pub sort_ascending: bool,
    /// Pin the longest sample to the first validation batch.
    pub pin_longest: bool,
    /// Number of loader workers (0 = load on the consumer thread).
    pub worker_count: usize,
    /// Path of the per-worker seed snapshot, containing `{worker}`. `None`
    /// keeps snapshots in memory for the lifetime of the process.
    pub rng_store_path_template: Option<String>,
    /// Seed used by a worker with no snapshot on record.
    pub default_seed: u32,
    /// Base seed of the validation sampler (`base_seed + epoch`).
    pub base_seed: u64,
}

impl Default for BucketingConfig {
    fn default() -> Self {
        Self {
            batch_size_fixed: 8,
            max_total_input_units: 62_000,
            max_total_output_units: 680,
            max_batch_elements: 24,
            advance_window_size: 4_000,
            shuffle: true,
            sort_ascending: false,
            pin_longest: true,
            worker_count: 0,
            rng_store_path_template: None,
            default_seed: DEFAULT_SEED,
            base_seed: 42,
        }
    }
}

impl BucketingConfig {
    pub fn builder() -> BucketingConfigBuilder {
        BucketingConfigBuilder::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("Failed to parse bucketing configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size_fixed < 2 {
            return Err(BatchingError::Configuration(format!(
                "batch_size_fixed must be >= 2, got {}",
                self.batch_size_fixed
            ))
            .into());
        }
        if self.advance_window_size == 0 {
            return Err(BatchingError::Configuration(
                "advance_window_size must be >= 1".to_string(),
            )
            .into());
        }
        if let Some(template) = &self.rng_store_path_template {
            if !template.contains(WORKER_PLACEHOLDER) {
                return Err(BatchingError::Configuration(format!(
                    "rng_store_path_template '{template}' must contain '{WORKER_PLACEHOLDER}'"
                ))
                .into());
            }
        }
        self.budget()?;
        Ok(())
    }

    pub fn budget(&self) -> Result<CapacityBudget> {
        CapacityBudget::new(
            self.max_total_input_units,
            self.max_total_output_units,
            self.max_batch_elements,
        )
    }

    /// File-backed store when a path template is configured, in-memory otherwise.
    pub fn rng_store(&self) -> Result<Arc<dyn RngStateStore>> {
        let store: Arc<dyn RngStateStore> = match &self.rng_store_path_template {
            Some(template) => Arc::new(FileRngStore::new(template.clone())?),
            None => Arc::new(InMemoryRngStore::new()),
        };
        Ok(store)
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig::builder()
            .num_workers(self.worker_count)
            .build()
    }

    /// Capacity-bucketed training sampler drawing seeds for `worker` from `store`.
    pub fn training_sampler(
        &self,
        lengths: LengthIndex,
        worker: WorkerId,
        store: Arc<dyn RngStateStore>,
    ) -> Result<DynamicBucketSampler> {
        self.bucket_sampler(lengths, SeedStream::new(store, worker))
    }

    /// Training sampler keyed by the calling thread, for samplers built inside
    /// a loader worker.
    pub fn training_sampler_for_current_thread(
        &self,
        lengths: LengthIndex,
        store: Arc<dyn RngStateStore>,
    ) -> Result<DynamicBucketSampler> {
        self.bucket_sampler(lengths, SeedStream::for_current_thread(store))
    }

    fn bucket_sampler(&self, lengths: LengthIndex, seeds: SeedStream) -> Result<DynamicBucketSampler> {
        let seeds = seeds.with_default_seed(self.default_seed);
        Ok(
            DynamicBucketSampler::new(lengths, self.budget()?, self.advance_window_size, seeds)?
                .with_shuffle(self.shuffle)
                .with_sort_ascending(self.sort_ascending),
        )
    }

    /// Fixed-size sorted sampler for validation.
    pub fn validation_sampler(&self, lengths: LengthIndex) -> Result<SortedBatchSampler> {
        Ok(
            SortedBatchSampler::new(lengths, self.batch_size_fixed, self.advance_window_size)?
                .with_shuffle(self.shuffle)
                .with_sort_ascending(self.sort_ascending)
                .with_pin_longest(self.pin_longest)
                .with_seed(self.base_seed),
        )
    }
}

/// Builder for BucketingConfig with method chaining
#[derive(Debug, Default)]
pub struct BucketingConfigBuilder {
    config: BucketingConfig,
}

impl BucketingConfigBuilder {
    pub fn batch_size_fixed(mut self, size: usize) -> Self {
        self.config.batch_size_fixed = size;
        self
    }

    pub fn max_total_input_units(mut self, units: usize) -> Self {
        self.config.max_total_input_units = units;
        self
    }

    pub fn max_total_output_units(mut self, units: usize) -> Self {
        self.config.max_total_output_units = units;
        self
    }

    pub fn max_batch_elements(mut self, elements: usize) -> Self {
        self.config.max_batch_elements = elements;
        self
    }

    pub fn advance_window_size(mut self, window: usize) -> Self {
        self.config.advance_window_size = window;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn sort_ascending(mut self, ascending: bool) -> Self {
        self.config.sort_ascending = ascending;
        self
    }

    pub fn pin_longest(mut self, pin: bool) -> Self {
        self.config.pin_longest = pin;
        self
    }

    pub fn worker_count(mut self, workers: usize) -> Self {
        self.config.worker_count = workers;
        self
    }

    pub fn rng_store_path_template(mut self, template: impl Into<String>) -> Self {
        self.config.rng_store_path_template = Some(template.into());
        self
    }

    pub fn default_seed(mut self, seed: u32) -> Self {
        self.config.default_seed = seed;
        self
    }

    pub fn base_seed(mut self, seed: u64) -> Self {
        self.config.base_seed = seed;
        self
    }

    /// Build and validate the final configuration.
    pub fn build(self) -> Result<BucketingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
