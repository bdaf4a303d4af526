//! Length-aware batching and padded collation for variable-length sequence
//! data (acoustic features paired with token labels).
//!
//! - [`lengths`]: per-sample length keys, cached once per pass
//! - [`sampler`]: windowed sort-shuffling, fixed-size validation batches and
//!   capacity-bucketed training batches
//! - [`rng_store`]: per-worker persisted seeds that carry one random stream
//!   across epochs and process restarts
//! - [`collator`]: zero/blank padding into a [`PaddedBatch`]
//! - [`dataloader`]: optional parallel materialization in sampler order

pub mod collator;
pub mod config;
pub mod dataloader;
pub mod dataset;
pub mod error;
pub mod lengths;
pub mod minibatch;
pub mod rng_store;
pub mod sample;
pub mod sampler;

pub use collator::{Collator, InputLayout, SequenceCollator};
pub use config::{BucketingConfig, BucketingConfigBuilder};
pub use dataloader::{DataLoader, DataLoaderIter, LoaderConfig};
pub use dataset::{InMemoryDataset, SequenceDataset};
pub use error::BatchingError;
pub use lengths::{LengthIndex, LengthSide, LengthSource, Lengths, MetaTable, SampleMeta, SortKey};
pub use minibatch::{LossTargets, ModelInputs, PaddedBatch, PaddingStats};
pub use rng_store::{
    FileRngStore, InMemoryRngStore, RngStateStore, RngStoreError, SeedStream, WorkerId,
};
pub use sample::SequenceSample;
pub use sampler::{
    bucketize, BucketAccumulator, CapacityBudget, DynamicBucketSampler, EpochBatches, Sampler,
    SortedBatchSampler, WindowLocalShuffler, WindowedShuffler,
};
