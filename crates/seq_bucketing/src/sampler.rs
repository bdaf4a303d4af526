pub mod bucket;
pub mod sorted;

pub use bucket::{bucketize, BucketAccumulator, CapacityBudget, DynamicBucketSampler, EpochBatches};
pub use sorted::{SortedBatchSampler, WindowLocalShuffler, WindowedShuffler};

/// A `Sampler` defines the order in which index batches are drawn from a
/// dataset for one epoch.
///
/// # Associated type
/// - `Item`: The handle yielded by the iterator. Every sampler in this crate
///   yields `Vec<usize>` index batches.
///
/// # Method
/// - `iter(epoch)`: returns the batches for that epoch. Samplers seeded from a
///   base seed derive the epoch RNG as `base_seed + epoch`; samplers backed by a
///   persisted seed stream advance the stream instead and ignore `epoch`.
///
/// Implementations must be `Send + Sync` so the same sampler instance can be
/// shared with the DataLoader.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;
}
