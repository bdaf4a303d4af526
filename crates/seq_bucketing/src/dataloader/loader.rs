//! src/dataloader/loader.rs
//!
//! The `DataLoader` ties a [`SequenceDataset`], a batch [`Sampler`] and a
//! [`Collator`] together.
//!
//! Each call to [`DataLoader::iter`] asks the sampler for the complete batch
//! list of that epoch up front, then materializes and collates batches either
//! on the calling thread (`num_workers = 0`) or on a fresh worker pool.

use crate::collator::Collator;
use crate::dataset::SequenceDataset;
use crate::sample::SequenceSample;
use crate::sampler::Sampler;
use anyhow::{Context, Result};
use std::sync::Arc;

use super::config::LoaderConfig;
use super::iterator::{BatchLoader, DataLoaderIter};

/// Coordinates dataset, sampler and collator for one training or validation
/// stream.
///
/// # Thread safety:
/// - The dataset and collator are shared with workers through `Arc`.
/// - Iterators own their worker pool; dropping an iterator early shuts the
///   pool down and discards any batches still in flight.
///
/// # Type parameters:
/// - `D`: Dataset type
/// - `S`: Sampler yielding index batches
/// - `C`: Collator turning materialized samples into a batch
pub struct DataLoader<D, S, C> {
    dataset: Arc<D>,
    sampler: S,
    collator: Arc<C>,
    config: LoaderConfig,
}

impl<D, S, C> DataLoader<D, S, C>
where
    D: SequenceDataset + 'static,
    S: Sampler<Item = Vec<usize>>,
    C: Collator<SequenceSample> + Send + Sync + 'static,
    C::Batch: Send + 'static,
{
    /// # Errors
    /// - Returns error if `prefetch_factor` is 0 when using workers
    /// - Returns error if a timeout or poll interval is zero
    pub fn new(dataset: Arc<D>, sampler: S, collator: C, config: LoaderConfig) -> Result<Self> {
        config.validate().context("Invalid DataLoader configuration")?;
        Ok(Self {
            dataset,
            sampler,
            collator: Arc::new(collator),
            config,
        })
    }

    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Creates an iterator over collated batches of `epoch`, in sampler order.
    pub fn iter(&self, epoch: usize) -> Result<DataLoaderIter<C::Batch>> {
        let batches: Vec<Vec<usize>> = self.sampler.iter(epoch).collect();
        tracing::debug!(
            epoch,
            batches = batches.len(),
            workers = self.config.num_workers,
            "starting loader epoch"
        );

        let dataset = self.dataset.clone();
        let collator = self.collator.clone();
        let load: BatchLoader<C::Batch> =
            Arc::new(move |indices: &[usize]| load_batch(&*dataset, &*collator, indices));

        if self.config.num_workers == 0 {
            Ok(DataLoaderIter::inline(batches, load))
        } else {
            DataLoaderIter::parallel(batches, load, &self.config)
        }
    }
}

/// Materializes `indices` and collates them, in order.
pub(crate) fn load_batch<D, C>(dataset: &D, collator: &C, indices: &[usize]) -> Result<C::Batch>
where
    D: SequenceDataset + ?Sized,
    C: Collator<SequenceSample> + ?Sized,
{
    let samples = indices
        .iter()
        .map(|&index| {
            dataset.materialize(index).with_context(|| {
                format!(
                    "Failed to load sample at index {} (dataset size: {})",
                    index,
                    dataset.len()
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    collator
        .collate(&samples)
        .with_context(|| format!("Failed to collate batch of {} samples", samples.len()))
}
