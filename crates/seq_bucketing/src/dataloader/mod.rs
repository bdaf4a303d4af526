//! src/dataloader/mod.rs
//!
//! This module implements the `DataLoader`.
//!
//! The `DataLoader` coordinates a `SequenceDataset`, a batch `Sampler` and a
//! `Collator` to feed padded batches to a training loop, with optional
//! parallel materialization.
//!
//! # Architecture Overview
//!
//! ```text
//!              ┌───────────────────┐
//!              │  SequenceDataset  │ (lengths + materialize)
//!              └─────────┬─────────┘
//!                        │ lengths, once per epoch
//!                        ↓
//!                 ┌─────────────┐
//!                 │   Sampler   │ (sorted fixed-size or capacity-bucketed)
//!                 └──────┬──────┘
//!                        │ full list of index batches for the epoch
//!                        ↓
//!                 ┌─────────────┐
//!                 │ DataLoader  │ ←───── LoaderConfig (workers, prefetch, timeout)
//!                 └──────┬──────┘
//!                        │ (seq, indices) on a shared queue
//!                        ↓
//!                [Worker Threads] (optional)
//!                        │ materialize + collate
//!                        ↓
//!               ┌─────────────────┐
//!               │   PaddedBatch   │ (reordered back into sampler order)
//!               └─────────────────┘
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs             # Public API exports + architecture docs
//! ├── config.rs          # LoaderConfig and builder
//! ├── loader.rs          # DataLoader
//! ├── iterator/
//! │   └── mod.rs         # DataLoaderIter, inline and parallel modes
//! ├── workers/
//! │   ├── mod.rs
//! │   └── pool.rs        # Generic `WorkerPool<Task, Output>`
//! └── common/
//!     ├── mod.rs
//!     └── thread.rs      # Thread-local worker ID
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let dataset = Arc::new(InMemoryDataset::new(samples, InputLayout::FeatureFrame));
//! let sampler = config.training_sampler(LengthIndex::build(&*dataset)?, WorkerId::main(), store)?;
//! let loader = DataLoader::new(
//!     dataset,
//!     sampler,
//!     SequenceCollator::new(InputLayout::FeatureFrame),
//!     LoaderConfig::builder().num_workers(4).build(),
//! )?;
//!
//! for epoch in 0..num_epochs {
//!     for batch in loader.iter(epoch)? {
//!         let batch: PaddedBatch = batch?;
//!     }
//! }
//! ```
//!
//! # Memory Usage
//! - Single-threaded: one batch at a time
//! - Multi-threaded: O(num_workers x prefetch_factor) batches

mod common;
mod config;
mod iterator;
mod loader;
mod workers;

pub use common::thread::{current_worker_id, current_worker_identity, WORKER_ID};
pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use iterator::DataLoaderIter;
pub use loader::DataLoader;
