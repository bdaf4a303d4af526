use crate::collator::InputLayout;
use crate::error::BatchingError;
use anyhow::{bail, Result};
use tch::Tensor;

/// A single materialized training example: an input feature buffer paired with
/// a label token sequence.
///
/// The label buffer may be physically longer than the meaningful label sequence
/// (e.g. when labels come from a fixed-width store); `output_len` marks how many
/// leading tokens are real. Only those are ever copied into a padded batch.
///
/// # Examples:
/// - Filterbank features: `input` of shape `[T, 80]`, labels `[12, 4, 9]`, `output_len = 3`
/// - Raw waveform: `input` of shape `[1, T]`, labels `[7, 7, 2, 0, 0]`, `output_len = 3`
#[derive(Debug)]
pub struct SequenceSample {
    input: Tensor,
    labels: Vec<i64>,
    output_len: usize,
}

/// Creates a shallow clone of the `SequenceSample`: the input tensor shares storage.
impl Clone for SequenceSample {
    fn clone(&self) -> Self {
        Self {
            input: self.input.shallow_clone(),
            labels: self.labels.clone(),
            output_len: self.output_len,
        }
    }
}

/// Safety:
/// `tch::Tensor` is marked `Send` and `Sync` in tch-rs, and `Vec<i64>` and
/// `usize` are both. The sample exposes no interior mutation through `&self`,
/// so shared references can be read concurrently by loader workers.
unsafe impl Send for SequenceSample {}
unsafe impl Sync for SequenceSample {}

impl SequenceSample {
    /// Creates a sample. Fails with [`BatchingError::LabelLength`] when
    /// `output_len` is larger than the label buffer.
    pub fn new(input: Tensor, labels: Vec<i64>, output_len: usize) -> Result<Self> {
        if output_len > labels.len() {
            return Err(BatchingError::LabelLength {
                output_len,
                physical: labels.len(),
            }
            .into());
        }
        Ok(Self {
            input,
            labels,
            output_len,
        })
    }

    /// Creates a sample whose whole label buffer is meaningful.
    pub fn with_full_labels(input: Tensor, labels: Vec<i64>) -> Self {
        let output_len = labels.len();
        Self {
            input,
            labels,
            output_len,
        }
    }

    pub fn input(&self) -> &Tensor {
        &self.input
    }

    /// The full physical label buffer, including any trailing filler.
    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// The meaningful prefix of the label buffer.
    pub fn label_tokens(&self) -> &[i64] {
        &self.labels[..self.output_len]
    }

    pub fn output_len(&self) -> usize {
        self.output_len
    }

    /// Size of the input along its time axis under `layout`.
    pub fn input_len(&self, layout: InputLayout) -> Result<usize> {
        let shape = self.input.size();
        match layout.time_axis(shape.len()) {
            Some(axis) => Ok(shape[axis] as usize),
            None => bail!("scalar input has no time axis"),
        }
    }
}
