//! src/dataloader/workers/mod.rs
//!
//! Worker threads that materialize and collate batches off the consumer thread.

pub(crate) mod pool;
