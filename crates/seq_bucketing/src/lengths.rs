//! Per-sample length keys used for ordering and capacity accounting.
//!
//! The lengths are pulled from the dataset exactly once per bucketing pass and
//! cached in a [`LengthIndex`]; every shuffle, sort and budget check after that
//! reads from the cache and never touches the dataset again.

use crate::error::BatchingError;
use anyhow::Result;

/// Input/output length pair of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lengths {
    /// Number of input units (e.g. stacked feature frames).
    pub input: usize,
    /// Number of output units (e.g. label tokens).
    pub output: usize,
}

impl Lengths {
    pub fn new(input: usize, output: usize) -> Self {
        Self { input, output }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthSide {
    Input,
    Output,
}

/// Anything that can report, per index, how long a sample is without
/// materializing it.
///
/// Implementations must be deterministic and side-effect free: the same index
/// always reports the same lengths for the lifetime of a pass.
pub trait LengthSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lengths(&self, index: usize) -> Result<Lengths>;
}

/// A metadata row describing one sample on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleMeta {
    /// Legacy `(path, input_length)` row. Carries no output length.
    Tuple(String, usize),
    /// Structured row with named length fields.
    Record {
        path: String,
        xlen: usize,
        ylen: usize,
    },
}

/// Which convention is used to pull lengths out of a [`SampleMeta`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Positional access: the second tuple slot is the input length.
    RawTuple,
    /// Named access through the `xlen` / `ylen` fields.
    #[default]
    NamedField,
}

impl SortKey {
    pub fn extract(&self, meta: &SampleMeta) -> Result<Lengths> {
        match (self, meta) {
            (SortKey::RawTuple, SampleMeta::Tuple(_, xlen)) => Ok(Lengths::new(*xlen, 0)),
            (SortKey::RawTuple, SampleMeta::Record { xlen, ylen, .. })
            | (SortKey::NamedField, SampleMeta::Record { xlen, ylen, .. }) => {
                Ok(Lengths::new(*xlen, *ylen))
            }
            (SortKey::NamedField, SampleMeta::Tuple(path, _)) => Err(BatchingError::Configuration(
                format!("row for '{path}' is a legacy tuple and has no named length fields"),
            )
            .into()),
        }
    }
}

/// Metadata rows read through a fixed [`SortKey`].
#[derive(Debug, Clone)]
pub struct MetaTable {
    rows: Vec<SampleMeta>,
    key: SortKey,
}

impl MetaTable {
    pub fn new(rows: Vec<SampleMeta>, key: SortKey) -> Self {
        Self { rows, key }
    }

    pub fn rows(&self) -> &[SampleMeta] {
        &self.rows
    }
}

impl LengthSource for MetaTable {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn lengths(&self, index: usize) -> Result<Lengths> {
        let row = self.rows.get(index).ok_or(BatchingError::IndexOutOfBounds {
            index,
            len: self.rows.len(),
        })?;
        self.key.extract(row)
    }
}

/// Cached length keys for every index of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthIndex {
    lengths: Vec<Lengths>,
    /// Global argmax of the input length, lowest index on a tie.
    longest: Option<usize>,
}

impl LengthIndex {
    /// Queries `source` once per index and caches the result.
    pub fn build(source: &dyn LengthSource) -> Result<Self> {
        let lengths = (0..source.len())
            .map(|index| source.lengths(index))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_lengths(lengths))
    }

    pub fn from_lengths(lengths: Vec<Lengths>) -> Self {
        let mut longest: Option<usize> = None;
        for (index, key) in lengths.iter().enumerate() {
            match longest {
                Some(best) if lengths[best].input >= key.input => {}
                _ => longest = Some(index),
            }
        }
        Self { lengths, longest }
    }

    /// Convenience for input-only datasets (output lengths are all zero).
    pub fn from_input_lengths(inputs: &[usize]) -> Self {
        Self::from_lengths(inputs.iter().map(|&x| Lengths::new(x, 0)).collect())
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Lengths> {
        self.lengths.get(index).copied().ok_or_else(|| {
            BatchingError::IndexOutOfBounds {
                index,
                len: self.lengths.len(),
            }
            .into()
        })
    }

    pub fn length_of(&self, index: usize, side: LengthSide) -> Result<usize> {
        let key = self.get(index)?;
        Ok(match side {
            LengthSide::Input => key.input,
            LengthSide::Output => key.output,
        })
    }

    /// Input length of an index that is already known to be in range.
    #[inline]
    pub(crate) fn input_unchecked(&self, index: usize) -> usize {
        self.lengths[index].input
    }

    #[inline]
    pub(crate) fn get_unchecked(&self, index: usize) -> Lengths {
        self.lengths[index]
    }

    /// Checks that every index in `indices` is in range.
    pub fn check_indices(&self, indices: &[usize]) -> Result<()> {
        match indices.iter().find(|&&i| i >= self.lengths.len()) {
            Some(&index) => Err(BatchingError::IndexOutOfBounds {
                index,
                len: self.lengths.len(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Index with the greatest input length among `indices`; the lowest index
    /// wins a tie, whatever order `indices` come in. `None` for an empty slice.
    pub fn argmax_input(&self, indices: &[usize]) -> Result<Option<usize>> {
        self.check_indices(indices)?;
        Ok(indices.iter().copied().reduce(|best, index| {
            let (b, i) = (self.input_unchecked(best), self.input_unchecked(index));
            if i > b || (i == b && index < best) {
                index
            } else {
                best
            }
        }))
    }

    /// The dataset-wide longest index, fixed for the lifetime of the index.
    pub fn longest(&self) -> Option<usize> {
        self.longest
    }

    pub fn max_input(&self) -> usize {
        self.longest.map_or(0, |index| self.lengths[index].input)
    }

    pub fn max_output(&self) -> usize {
        self.lengths.iter().map(|l| l.output).max().unwrap_or(0)
    }

    /// Stable sort of `indices` by input length.
    pub fn sort_by_input(&self, indices: &mut [usize], ascending: bool) -> Result<()> {
        self.check_indices(indices)?;
        self.sort_by_input_unchecked(indices, ascending);
        Ok(())
    }

    pub(crate) fn sort_by_input_unchecked(&self, indices: &mut [usize], ascending: bool) {
        if ascending {
            indices.sort_by_key(|&i| self.input_unchecked(i));
        } else {
            indices.sort_by(|&a, &b| self.input_unchecked(b).cmp(&self.input_unchecked(a)));
        }
    }
}
