//! Variable-size batches packed under a capacity budget.
//!
//! Training batches are built by greedily packing a window-sorted index stream
//! into bins bounded by total input units, total output units and an element
//! count cap. The bins are as large as the budget allows, so long utterances
//! end up in small batches and short ones in large batches.

use super::sorted::permute_and_window_sort;
use super::Sampler;
use crate::error::BatchingError;
use crate::lengths::{LengthIndex, Lengths};
use crate::rng_store::SeedStream;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Mutex;

/// Per-batch limits. A batch is valid iff
/// - the sum of input lengths is at most `max_total_input_units`,
/// - the sum of output lengths is at most `max_total_output_units`,
/// - its longest input times its element count is at most `max_total_input_units`,
/// - it holds at most `max_batch_elements` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityBudget {
    max_total_input_units: usize,
    max_total_output_units: usize,
    max_batch_elements: usize,
}

impl CapacityBudget {
    pub fn new(
        max_total_input_units: usize,
        max_total_output_units: usize,
        max_batch_elements: usize,
    ) -> Result<Self> {
        if max_total_input_units == 0 || max_total_output_units == 0 {
            return Err(BatchingError::Configuration(format!(
                "capacity budgets must be positive, got input={max_total_input_units}, output={max_total_output_units}"
            ))
            .into());
        }
        if max_batch_elements < 2 {
            return Err(BatchingError::Configuration(format!(
                "max_batch_elements must be >= 2, got {max_batch_elements}"
            ))
            .into());
        }
        Ok(Self {
            max_total_input_units,
            max_total_output_units,
            max_batch_elements,
        })
    }

    pub fn max_total_input_units(&self) -> usize {
        self.max_total_input_units
    }

    pub fn max_total_output_units(&self) -> usize {
        self.max_total_output_units
    }

    pub fn max_batch_elements(&self) -> usize {
        self.max_batch_elements
    }

    /// Whether a batch with these aggregates satisfies all four limits.
    pub fn admits(&self, count: usize, input_sum: usize, output_sum: usize, max_input: usize) -> bool {
        input_sum <= self.max_total_input_units
            && output_sum <= self.max_total_output_units
            && max_input.saturating_mul(count) <= self.max_total_input_units
            && count <= self.max_batch_elements
    }

    /// Whether a sample with `key` fits in a batch on its own.
    pub fn fits_alone(&self, key: Lengths) -> bool {
        self.admits(1, key.input, key.output, key.input)
    }
}

/// Running aggregate of the batch currently being filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketAccumulator {
    members: Vec<usize>,
    input_sum: usize,
    output_sum: usize,
    max_input: usize,
}

impl BucketAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An accumulator holding just `index`.
    pub fn seeded(index: usize, key: Lengths) -> Self {
        let mut acc = Self::new();
        acc.push(index, key);
        acc
    }

    /// Whether adding a sample with `key` keeps the batch within `budget`.
    ///
    /// The element-count product uses the prospective max, i.e. the max
    /// including the candidate.
    pub fn admits(&self, key: Lengths, budget: &CapacityBudget) -> bool {
        budget.admits(
            self.members.len() + 1,
            self.input_sum + key.input,
            self.output_sum + key.output,
            self.max_input.max(key.input),
        )
    }

    pub fn push(&mut self, index: usize, key: Lengths) {
        self.members.push(index);
        self.input_sum += key.input;
        self.output_sum += key.output;
        self.max_input = self.max_input.max(key.input);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn input_sum(&self) -> usize {
        self.input_sum
    }

    pub fn output_sum(&self) -> usize {
        self.output_sum
    }

    pub fn max_input(&self) -> usize {
        self.max_input
    }

    pub fn into_members(self) -> Vec<usize> {
        self.members
    }
}

/// Greedy left-to-right packing of `order` into batches under `budget`.
///
/// A candidate that does not fit closes the open batch and seeds the next one.
/// Singletons are kept here; dropping them is the caller's decision.
pub fn bucketize(
    order: &[usize],
    lengths: &LengthIndex,
    budget: &CapacityBudget,
) -> Result<Vec<Vec<usize>>> {
    lengths.check_indices(order)?;
    Ok(bucketize_checked(order, lengths, budget))
}

fn bucketize_checked(order: &[usize], lengths: &LengthIndex, budget: &CapacityBudget) -> Vec<Vec<usize>> {
    let (mut closed, open) = order.iter().fold(
        (Vec::new(), BucketAccumulator::new()),
        |(mut closed, mut open), &index| {
            let key = lengths.get_unchecked(index);
            if open.admits(key, budget) {
                open.push(index, key);
            } else {
                if !open.is_empty() {
                    closed.push(open.into_members());
                }
                open = BucketAccumulator::seeded(index, key);
            }
            (closed, open)
        },
    );
    if !open.is_empty() {
        closed.push(open.into_members());
    }
    closed
}

/// Batches of one training epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochBatches {
    /// Batches in yield order, each with at least two members.
    pub batches: Vec<Vec<usize>>,
    /// Indices that ended up alone in a batch and were dropped this epoch.
    pub dropped: Vec<usize>,
    /// Seed the epoch was shuffled with; `None` when shuffling is off.
    pub seed: Option<u32>,
}

impl EpochBatches {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<usize>> {
        self.batches.iter()
    }
}

impl IntoIterator for EpochBatches {
    type Item = Vec<usize>;
    type IntoIter = std::vec::IntoIter<Vec<usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}

/// ============================================================================
/// Training sampler yielding variable-size, budget-bounded batches.
///
/// Each epoch:
/// 1. Read this worker's seed from its [`SeedStream`].
/// 2. Permute all indices and pin the dataset-wide longest one (lowest index
///    on a tie) to slot 0.
/// 3. Sort each `advance_window` chunk by input length, descending.
/// 4. Pack greedily with [`bucketize`] and drop singleton batches.
/// 5. Shuffle within each batch, then shuffle the batch order.
/// 6. Draw the next seed from the same RNG and persist it.
///
/// Epochs advance through the seed store rather than through the epoch
/// number, so restarting a worker continues its stream where it left off.
/// With `shuffle = false` the batches come from a global sort in the
/// `sort_ascending` direction and neither the RNG nor the store is touched.
/// `sort_ascending` has no effect on shuffled epochs.
///
/// # Example
/// ```ignore
/// let sampler = DynamicBucketSampler::new(
///     LengthIndex::build(&dataset)?,
///     CapacityBudget::new(62_000, 680, 24)?,
///     4000,
///     SeedStream::new(store, WorkerId::from_index(0)),
/// )?;
/// for batch in sampler.iter(epoch) { /* ... */ }
/// ```
#[derive(Debug)]
pub struct DynamicBucketSampler {
    lengths: LengthIndex,
    budget: CapacityBudget,
    advance_window: usize,
    shuffle: bool,
    sort_ascending: bool,
    seeds: SeedStream,
    last_len: Mutex<Option<usize>>,
}

impl DynamicBucketSampler {
    pub fn new(
        lengths: LengthIndex,
        budget: CapacityBudget,
        advance_window: usize,
        seeds: SeedStream,
    ) -> Result<Self> {
        if lengths.is_empty() {
            return Err(
                BatchingError::Configuration("cannot bucket an empty dataset".to_string()).into(),
            );
        }
        if advance_window == 0 {
            return Err(
                BatchingError::Configuration("advance_window must be >= 1".to_string()).into(),
            );
        }
        let longest = Lengths::new(lengths.max_input(), lengths.max_output());
        if !budget.fits_alone(longest) {
            return Err(BatchingError::Configuration(format!(
                "budget {budget:?} cannot hold the largest sample (input={}, output={})",
                longest.input, longest.output
            ))
            .into());
        }
        Ok(Self {
            lengths,
            budget,
            advance_window,
            shuffle: true,
            sort_ascending: false,
            seeds,
            last_len: Mutex::new(None),
        })
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Direction of the global sort used when shuffling is off.
    pub fn with_sort_ascending(mut self, ascending: bool) -> Self {
        self.sort_ascending = ascending;
        self
    }

    pub fn budget(&self) -> &CapacityBudget {
        &self.budget
    }

    pub fn seeds(&self) -> &SeedStream {
        &self.seeds
    }

    /// Batch count of the most recent epoch, or the dataset size before the
    /// first one.
    pub fn num_batches(&self) -> usize {
        let last = match self.last_len.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        last.unwrap_or(self.lengths.len())
    }

    fn record_len(&self, len: usize) {
        match self.last_len.lock() {
            Ok(mut guard) => *guard = Some(len),
            Err(poisoned) => *poisoned.into_inner() = Some(len),
        }
    }

    /// Builds every batch of the next epoch.
    pub fn produce_epoch_batches(&self) -> EpochBatches {
        let mut order: Vec<usize> = (0..self.lengths.len()).collect();

        let epoch = if self.shuffle {
            let seed = self.seeds.current();
            let mut rng = StdRng::seed_from_u64(seed as u64);

            permute_and_window_sort(
                &mut order,
                &self.lengths,
                self.advance_window,
                self.lengths.longest(),
                false,
                &mut rng,
            );
            let (mut batches, dropped) =
                split_singletons(bucketize_checked(&order, &self.lengths, &self.budget));
            for batch in batches.iter_mut() {
                batch.shuffle(&mut rng);
            }
            batches.shuffle(&mut rng);

            let next = self.seeds.advance(&mut rng);
            tracing::trace!(worker = %self.seeds.worker(), seed, next, "advanced rng stream");
            EpochBatches {
                batches,
                dropped,
                seed: Some(seed),
            }
        } else {
            self.lengths
                .sort_by_input_unchecked(&mut order, self.sort_ascending);
            let (batches, dropped) =
                split_singletons(bucketize_checked(&order, &self.lengths, &self.budget));
            EpochBatches {
                batches,
                dropped,
                seed: None,
            }
        };

        self.record_len(epoch.len());
        tracing::debug!(
            worker = %self.seeds.worker(),
            batches = epoch.len(),
            dropped = epoch.dropped.len(),
            seed = ?epoch.seed,
            "built epoch batches"
        );
        epoch
    }
}

fn split_singletons(batches: Vec<Vec<usize>>) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut kept = Vec::with_capacity(batches.len());
    let mut dropped = Vec::new();
    for batch in batches {
        match batch.as_slice() {
            [single] => dropped.push(*single),
            _ => kept.push(batch),
        }
    }
    (kept, dropped)
}

impl Sampler for DynamicBucketSampler {
    type Item = Vec<usize>;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        Box::new(self.produce_epoch_batches().into_iter())
    }
}
