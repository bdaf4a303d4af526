#![allow(dead_code)]

use anyhow::{anyhow, Result};
use seq_bucketing::{
    EpochBatches, InMemoryDataset, InputLayout, LengthSource, Lengths, SequenceDataset,
    SequenceSample,
};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tch::{Device, Kind, Tensor};

/// Feature-frame sample of `frames` x 2 whose every value equals `tag`, so a
/// padded batch row can be traced back to its dataset index.
pub fn tagged_sample(tag: usize, frames: i64, output_len: usize) -> SequenceSample {
    let input = Tensor::full(&[frames, 2], tag as f64, (Kind::Float, Device::Cpu));
    let labels = (0..output_len as i64).map(|t| t + 1).collect();
    SequenceSample::with_full_labels(input, labels)
}

/// In-memory dataset where sample `i` has `lengths[i]` frames and is tagged `i`.
pub fn tagged_dataset(lengths: &[(i64, usize)]) -> InMemoryDataset {
    let samples = lengths
        .iter()
        .enumerate()
        .map(|(i, &(frames, out))| tagged_sample(i, frames, out))
        .collect();
    InMemoryDataset::new(samples, InputLayout::FeatureFrame)
}

/// Reads the tag of every row of a collated feature-frame input buffer.
pub fn row_tags(input: &Tensor) -> Vec<usize> {
    (0..input.size()[0])
        .map(|row| input.double_value(&[row, 0, 0]) as usize)
        .collect()
}

/// Asserts every index in `0..n` appears exactly once across kept and dropped.
pub fn assert_partition(epoch: &EpochBatches, n: usize) {
    let mut seen = HashSet::with_capacity(n);
    for &index in epoch.batches.iter().flatten().chain(epoch.dropped.iter()) {
        assert!(index < n, "index {index} out of range");
        assert!(seen.insert(index), "index {index} emitted twice");
    }
    assert_eq!(seen.len(), n, "some indices were never emitted");
}

/// Wraps a dataset and sleeps before materializing, with a per-index delay.
pub struct SlowDataset {
    pub inner: InMemoryDataset,
    pub delay: fn(usize) -> Duration,
}

impl LengthSource for SlowDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn lengths(&self, index: usize) -> Result<Lengths> {
        self.inner.lengths(index)
    }
}

impl SequenceDataset for SlowDataset {
    fn materialize(&self, index: usize) -> Result<SequenceSample> {
        thread::sleep((self.delay)(index));
        self.inner.materialize(index)
    }
}

/// Wraps a dataset and fails to materialize one index.
pub struct FailingDataset {
    pub inner: InMemoryDataset,
    pub fail_at: usize,
}

impl LengthSource for FailingDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn lengths(&self, index: usize) -> Result<Lengths> {
        self.inner.lengths(index)
    }
}

impl SequenceDataset for FailingDataset {
    fn materialize(&self, index: usize) -> Result<SequenceSample> {
        if index == self.fail_at {
            return Err(anyhow!("corrupt feature file for sample {index}"));
        }
        self.inner.materialize(index)
    }
}
