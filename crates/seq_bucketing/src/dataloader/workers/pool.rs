//! Worker pool for parallel sample materialization and collation.
//!
//! Workers pull tasks from one shared bounded queue and push results into one
//! bounded output channel. Workers never talk to each other; the consumer owns
//! ordering.
//!
//! # Key features
//! - Bounded channels cap the number of batches held in memory
//! - Graceful shutdown on drop
//! - Thread-local worker IDs for logging, also used by
//!   `SeedStream::for_current_thread` to pick the worker's seed snapshot

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::dataloader::common::thread::WORKER_ID;

/// Thread pool for parallel data loading.
///
/// - Task channel: Main thread -> Workers (shared queue)
/// - Output channel: Workers -> Main thread
/// - Shutdown flag: Enables graceful termination
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_tx: Option<Sender<Task>>,
    output_rx: Receiver<Output>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads running `worker_fn`, each sharing one task
    /// queue of capacity `buffer_size`.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with 0 workers. \
                Either set num_workers > 0 or use single-threaded mode."
            ));
        }

        if buffer_size == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks."
            ));
        }

        let (task_tx, task_rx) = bounded(buffer_size);
        let (output_tx, output_rx) = bounded(buffer_size);

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let task_rx = task_rx.clone();
            let output_tx = output_tx.clone();
            let shutdown_clone = shutdown.clone();
            let worker_fn_clone = worker_fn.clone();

            let handle = thread::Builder::new()
                .name(format!("seq-loader-worker-{}", worker_id))
                .spawn(move || {
                    WORKER_ID.with(|id| *id.borrow_mut() = Some(worker_id));
                    tracing::trace!(worker = worker_id, "loader worker started");
                    worker_fn_clone(task_rx, output_tx, shutdown_clone);
                    tracing::trace!(worker = worker_id, "loader worker stopped");
                })
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;

            workers.push(handle);
        }

        Ok(Self {
            workers,
            task_tx: Some(task_tx),
            output_rx,
            shutdown,
        })
    }

    /// Queues a task. Blocks while the queue is full.
    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        let tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| anyhow!("worker pool is shutting down"))?;
        tx.send(task)
            .map_err(|_| anyhow!("all loader workers have exited"))
    }

    /// Waits up to `timeout` for the next result from any worker.
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Result<Output> {
        match self.output_rx.recv_timeout(timeout) {
            Ok(output) => Ok(output),
            Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                "timed out after {:?} waiting for a batch from loader workers",
                timeout
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("all loader workers exited before delivering a batch"))
            }
        }
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        // Signal shutdown to all workers
        self.shutdown.store(true, Ordering::Relaxed);

        // Drop the task sender to close the queue
        self.task_tx.take();

        // Wait for workers to finish
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod worker_pool_tests {
    use super::*;
    use crate::dataloader::common::thread::current_worker_id;

    fn echo_pool(num_workers: usize) -> Result<WorkerPool<u32, (Option<usize>, u32)>> {
        WorkerPool::new(num_workers, 4, |task_rx, output_tx, shutdown| {
            while !shutdown.load(Ordering::Relaxed) {
                match task_rx.recv_timeout(Duration::from_millis(10)) {
                    Ok(task) => {
                        if output_tx.send((current_worker_id(), task * 2)).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
    }

    #[test]
    fn rejects_zero_workers_or_buffer() {
        let noop = |_: Receiver<u32>, _: Sender<u32>, _: Arc<AtomicBool>| {};
        assert!(WorkerPool::new(0, 4, noop).is_err());
        assert!(WorkerPool::new(2, 0, noop).is_err());
    }

    #[test]
    fn workers_process_tasks_and_know_their_id() -> Result<()> {
        let pool = echo_pool(3)?;
        assert_eq!(pool.num_workers(), 3);
        for task in 0..4 {
            pool.submit(task)?;
        }
        let mut doubled = Vec::new();
        for _ in 0..4 {
            let (worker, value) = pool.recv_timeout(Duration::from_secs(5))?;
            assert!(matches!(worker, Some(id) if id < 3));
            doubled.push(value);
        }
        doubled.sort_unstable();
        assert_eq!(doubled, vec![0, 2, 4, 6]);
        Ok(())
    }

    #[test]
    fn recv_times_out_when_idle() -> Result<()> {
        let pool = echo_pool(1)?;
        assert!(pool.recv_timeout(Duration::from_millis(20)).is_err());
        Ok(())
    }
}
