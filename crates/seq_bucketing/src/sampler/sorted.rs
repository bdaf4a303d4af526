use super::Sampler;
use crate::error::BatchingError;
use crate::lengths::LengthIndex;
use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Permutes `order` in place, moves `pin` (when present in `order`) to slot 0,
/// then sorts every contiguous `window`-sized chunk by input length.
///
/// `pin` is chosen before the permutation, so the pinned index never depends on
/// the RNG. A pinned slot is excluded from the sort of the first chunk so it
/// stays first in either direction. All indices must be in range.
pub(crate) fn permute_and_window_sort<R: Rng + ?Sized>(
    order: &mut [usize],
    lengths: &LengthIndex,
    window: usize,
    pin: Option<usize>,
    ascending: bool,
    rng: &mut R,
) {
    order.shuffle(rng);

    let pinned = pin.is_some_and(|target| pin_to_front(order, target));
    for (chunk_id, chunk) in order.chunks_mut(window).enumerate() {
        let chunk = if pinned && chunk_id == 0 {
            &mut chunk[1..]
        } else {
            chunk
        };
        lengths.sort_by_input_unchecked(chunk, ascending);
    }
}

/// Swaps `target` into slot 0.
fn pin_to_front(order: &mut [usize], target: usize) -> bool {
    match order.iter().position(|&index| index == target) {
        Some(pos) => {
            order.swap(0, pos);
            true
        }
        None => false,
    }
}

fn chunk_batches(order: &[usize], batch_size: usize, drop_last: bool) -> Vec<Vec<usize>> {
    order
        .chunks(batch_size)
        .filter(|chunk| !drop_last || chunk.len() == batch_size)
        .map(<[usize]>::to_vec)
        .collect()
}

fn validate_window(batch_size: usize, advance_window: usize) -> Result<()> {
    if batch_size < 2 || advance_window == 0 {
        return Err(BatchingError::Configuration(format!(
            "batch_size must be >= 2 and advance_window >= 1, got batch_size={batch_size}, advance_window={advance_window}"
        ))
        .into());
    }
    Ok(())
}

/// ============================================================================
/// Produces one epoch's worth of fixed-size batches whose order approximates a
/// descending sort by input length, with randomness confined to windows.
///
/// 1. Draw a uniform permutation of the indices.
/// 2. Move the index with the greatest input length to slot 0, so the first
///    batch of every epoch hits peak memory. Among tied maxima the lowest
///    index is pinned, every epoch.
/// 3. Sort each `advance_window`-sized chunk by input length, descending.
/// 4. Split into batches of `batch_size`; keep the first and last batches in
///    place and shuffle the ones in between.
///
/// # Example
/// ```ignore
/// let shuffler = WindowedShuffler::new(8, 4000)?;
/// let batches = shuffler.shuffle(&indices, &lengths, &mut rng)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WindowedShuffler {
    batch_size: usize,
    advance_window: usize,
}

impl WindowedShuffler {
    pub fn new(batch_size: usize, advance_window: usize) -> Result<Self> {
        validate_window(batch_size, advance_window)?;
        Ok(Self {
            batch_size,
            advance_window,
        })
    }

    pub fn shuffle<R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        lengths: &LengthIndex,
        rng: &mut R,
    ) -> Result<Vec<Vec<usize>>> {
        let pin = lengths.argmax_input(indices)?;
        Ok(self.shuffle_checked(indices.to_vec(), lengths, pin, false, rng))
    }

    fn shuffle_checked<R: Rng + ?Sized>(
        &self,
        mut order: Vec<usize>,
        lengths: &LengthIndex,
        pin: Option<usize>,
        drop_last: bool,
        rng: &mut R,
    ) -> Vec<Vec<usize>> {
        permute_and_window_sort(&mut order, lengths, self.advance_window, pin, false, rng);

        let mut batches = chunk_batches(&order, self.batch_size, drop_last);
        if batches.len() > 2 {
            let last = batches.len() - 1;
            batches[1..last].shuffle(rng);
        }
        batches
    }
}

/// ============================================================================
/// Window-local shuffling without pinning: permute, sort each window chunk in
/// the configured direction, split into fixed-size batches. Batch order is
/// left as produced.
#[derive(Debug, Clone, Copy)]
pub struct WindowLocalShuffler {
    batch_size: usize,
    advance_window: usize,
    ascending: bool,
}

impl WindowLocalShuffler {
    pub fn new(batch_size: usize, advance_window: usize, ascending: bool) -> Result<Self> {
        validate_window(batch_size, advance_window)?;
        Ok(Self {
            batch_size,
            advance_window,
            ascending,
        })
    }

    pub fn shuffle<R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        lengths: &LengthIndex,
        rng: &mut R,
    ) -> Result<Vec<Vec<usize>>> {
        lengths.check_indices(indices)?;
        Ok(self.shuffle_checked(indices.to_vec(), lengths, false, rng))
    }

    fn shuffle_checked<R: Rng + ?Sized>(
        &self,
        mut order: Vec<usize>,
        lengths: &LengthIndex,
        drop_last: bool,
        rng: &mut R,
    ) -> Vec<Vec<usize>> {
        permute_and_window_sort(
            &mut order,
            lengths,
            self.advance_window,
            None,
            self.ascending,
            rng,
        );
        chunk_batches(&order, self.batch_size, drop_last)
    }
}

/// ============================================================================
/// Fixed-size batch sampler over a length-sorted index stream, for validation.
///
/// # Arguments:
/// - `lengths`: cached length keys for every dataset index.
/// - `batch_size`: fixed batch size, must be >= 2.
/// - `advance_window`: chunk size inside which randomness is confined.
///
/// # Modes
/// - `shuffle = false`: globally sorted by input length in the `sort_ascending`
///   direction. No randomness.
/// - `shuffle = true`, `pin_longest = true`: [`WindowedShuffler`] output.
/// - `shuffle = true`, `pin_longest = false`: [`WindowLocalShuffler`] output.
///
/// There is no singleton elimination; the last batch may be short unless
/// `drop_last` is set. Shuffled epochs derive their RNG as `base_seed + epoch`.
#[derive(Debug, Clone)]
pub struct SortedBatchSampler {
    lengths: LengthIndex,
    batch_size: usize,
    advance_window: usize,
    shuffle: bool,
    sort_ascending: bool,
    pin_longest: bool,
    drop_last: bool,
    base_seed: u64,
}

impl SortedBatchSampler {
    pub fn new(lengths: LengthIndex, batch_size: usize, advance_window: usize) -> Result<Self> {
        if batch_size < 2 {
            return Err(BatchingError::Configuration(format!(
                "fixed batch size must be >= 2, got {batch_size}"
            ))
            .into());
        }
        ensure!(
            advance_window > 0,
            BatchingError::Configuration("advance_window must be >= 1".to_string())
        );
        Ok(Self {
            lengths,
            batch_size,
            advance_window,
            shuffle: false,
            sort_ascending: false,
            pin_longest: true,
            drop_last: false,
            base_seed: 42,
        })
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_sort_ascending(mut self, ascending: bool) -> Self {
        self.sort_ascending = ascending;
        self
    }

    pub fn with_pin_longest(mut self, pin: bool) -> Self {
        self.pin_longest = pin;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn with_seed(mut self, base_seed: u64) -> Self {
        self.base_seed = base_seed;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches every epoch yields.
    pub fn num_batches(&self) -> usize {
        let n = self.lengths.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    fn derive_rng_for_epoch(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.base_seed.wrapping_add(epoch as u64))
    }

    /// All batches of one epoch.
    pub fn batches(&self, epoch: usize) -> Vec<Vec<usize>> {
        let order: Vec<usize> = (0..self.lengths.len()).collect();
        if !self.shuffle {
            let mut order = order;
            self.lengths
                .sort_by_input_unchecked(&mut order, self.sort_ascending);
            return chunk_batches(&order, self.batch_size, self.drop_last);
        }

        let mut rng = self.derive_rng_for_epoch(epoch);
        if self.pin_longest {
            WindowedShuffler {
                batch_size: self.batch_size,
                advance_window: self.advance_window,
            }
            .shuffle_checked(
                order,
                &self.lengths,
                self.lengths.longest(),
                self.drop_last,
                &mut rng,
            )
        } else {
            WindowLocalShuffler {
                batch_size: self.batch_size,
                advance_window: self.advance_window,
                ascending: self.sort_ascending,
            }
            .shuffle_checked(order, &self.lengths, self.drop_last, &mut rng)
        }
    }
}

impl Sampler for SortedBatchSampler {
    type Item = Vec<usize>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        Box::new(self.batches(epoch).into_iter())
    }
}
