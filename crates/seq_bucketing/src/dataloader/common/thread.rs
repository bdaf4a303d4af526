//! Thread-local storage for worker identification.
//!
//! Loader threads record their index here at spawn, so code running inside a
//! worker can name itself in logs and pick its own RNG snapshot.

use crate::rng_store::WorkerId;
use std::cell::RefCell;

thread_local! {
    /// Index of the loader worker running on this thread, `None` on any other
    /// thread (including the consumer thread in single-threaded mode).
    pub static WORKER_ID: RefCell<Option<usize>> = const { RefCell::new(None) };
}

/// Index of the current loader worker, if this is a worker thread.
pub fn current_worker_id() -> Option<usize> {
    WORKER_ID.with(|id| *id.borrow())
}

/// RNG store identity of the current thread: the worker index on a loader
/// thread, `main` everywhere else.
pub fn current_worker_identity() -> WorkerId {
    current_worker_id()
        .map(WorkerId::from_index)
        .unwrap_or_else(WorkerId::main)
}
