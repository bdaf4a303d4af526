//! src/dataloader/common/mod.rs
//!
//! Utilities shared by the loader and its workers.

pub mod thread;
