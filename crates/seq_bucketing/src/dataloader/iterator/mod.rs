//! src/dataloader/iterator/mod.rs
//!
//! Iteration over one epoch's precomputed batch list.
//!
//! - `Inline`: each batch is loaded on the consumer thread when requested.
//! - `Parallel`: batches are tagged with their position and handed to a
//!   worker pool. Results can arrive out of order; they are parked in a
//!   reorder buffer and released strictly in sampler order. At most
//!   `num_workers * prefetch_factor` batches are outstanding at any time.
//!
//! The first error ends the epoch: it is yielded once and every later call to
//! `next` returns `None`.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dataloader::common::thread::current_worker_id;
use crate::dataloader::config::LoaderConfig;
use crate::dataloader::workers::pool::WorkerPool;

/// Shared batch-loading function: index batch in, collated batch out.
pub(crate) type BatchLoader<B> = Arc<dyn Fn(&[usize]) -> Result<B> + Send + Sync>;

type Task = (usize, Vec<usize>);
type Output<B> = (usize, Result<B>);

/// Iterator returned by [`DataLoader::iter`](super::DataLoader::iter).
pub struct DataLoaderIter<B> {
    inner: IteratorImpl<B>,
    total: usize,
    yielded: usize,
}

enum IteratorImpl<B> {
    Inline {
        batches: std::vec::IntoIter<Vec<usize>>,
        load: BatchLoader<B>,
    },
    Parallel(ParallelState<B>),
    Finished,
}

struct ParallelState<B> {
    pool: WorkerPool<Task, Output<B>>,
    batches: std::vec::IntoIter<Vec<usize>>,
    next_submit: usize,
    next_yield: usize,
    in_flight: usize,
    max_in_flight: usize,
    reorder: BTreeMap<usize, Result<B>>,
    timeout: Duration,
}

impl<B: Send + 'static> DataLoaderIter<B> {
    pub(crate) fn inline(batches: Vec<Vec<usize>>, load: BatchLoader<B>) -> Self {
        Self {
            total: batches.len(),
            yielded: 0,
            inner: IteratorImpl::Inline {
                batches: batches.into_iter(),
                load,
            },
        }
    }

    pub(crate) fn parallel(
        batches: Vec<Vec<usize>>,
        load: BatchLoader<B>,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let max_in_flight = config.max_in_flight();
        let poll_interval = config.poll_interval;

        let pool = WorkerPool::new(
            config.num_workers,
            max_in_flight,
            move |task_rx: Receiver<Task>, output_tx: Sender<Output<B>>, shutdown: Arc<AtomicBool>| {
                let worker_id = current_worker_id();
                while !shutdown.load(Ordering::Relaxed) {
                    match task_rx.recv_timeout(poll_interval) {
                        Ok((seq, indices)) => {
                            let result = load(indices.as_slice()).with_context(|| {
                                format!(
                                    "Worker {:?} failed to process batch {} with {} indices",
                                    worker_id,
                                    seq,
                                    indices.len()
                                )
                            });
                            if output_tx.send((seq, result)).is_err() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            },
        )
        .context("Failed to create worker pool")?;

        Ok(Self {
            total: batches.len(),
            yielded: 0,
            inner: IteratorImpl::Parallel(ParallelState {
                pool,
                batches: batches.into_iter(),
                next_submit: 0,
                next_yield: 0,
                in_flight: 0,
                max_in_flight,
                reorder: BTreeMap::new(),
                timeout: config.timeout,
            }),
        })
    }

    /// Number of batches this epoch yields if no error occurs.
    pub fn num_batches(&self) -> usize {
        self.total
    }
}

impl<B: Send + 'static> ParallelState<B> {
    /// Submits batches until the in-flight bound is reached or the list runs out.
    fn fill(&mut self) -> Result<()> {
        while self.in_flight + self.reorder.len() < self.max_in_flight {
            let Some(indices) = self.batches.next() else {
                break;
            };
            self.pool.submit((self.next_submit, indices))?;
            self.next_submit += 1;
            self.in_flight += 1;
        }
        Ok(())
    }

    /// `None` once every submitted batch has been yielded and nothing is left.
    fn next_result(&mut self) -> Option<Result<B>> {
        if let Err(err) = self.fill() {
            return Some(Err(err));
        }

        if let Some(result) = self.reorder.remove(&self.next_yield) {
            self.next_yield += 1;
            return Some(result);
        }
        if self.in_flight == 0 {
            return None;
        }

        loop {
            match self.pool.recv_timeout(self.timeout) {
                Ok((seq, result)) => {
                    self.in_flight -= 1;
                    if seq == self.next_yield {
                        self.next_yield += 1;
                        return Some(result);
                    }
                    self.reorder.insert(seq, result);
                }
                Err(err) => {
                    return Some(Err(err.context(format!(
                        "while waiting for batch {}",
                        self.next_yield
                    ))))
                }
            }
        }
    }
}

impl<B: Send + 'static> Iterator for DataLoaderIter<B> {
    type Item = Result<B>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match &mut self.inner {
            IteratorImpl::Inline { batches, load } => {
                let seq = self.yielded;
                batches.next().map(|indices| {
                    load(indices.as_slice()).with_context(|| format!("Failed to load batch {seq}"))
                })
            }
            IteratorImpl::Parallel(state) => state.next_result(),
            IteratorImpl::Finished => None,
        };

        match &result {
            Some(Ok(_)) => self.yielded += 1,
            // Dropping the state also shuts the pool down.
            Some(Err(_)) | None => self.inner = IteratorImpl::Finished,
        }
        result
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.inner {
            IteratorImpl::Finished => (0, Some(0)),
            _ => (0, Some(self.total - self.yielded)),
        }
    }
}
