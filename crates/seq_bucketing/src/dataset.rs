use crate::collator::InputLayout;
use crate::error::BatchingError;
use crate::lengths::{LengthSource, Lengths};
use crate::sample::SequenceSample;
use anyhow::Result;
use std::sync::Arc;

/// A `SequenceDataset` reports per-index lengths cheaply (via [`LengthSource`])
/// and materializes a full [`SequenceSample`] only for indices that end up in a
/// batch.
///
/// Implementations must be `Send + Sync` so loader workers can share one
/// instance behind an `Arc`.
pub trait SequenceDataset: LengthSource {
    /// Loads the sample at `index`. Out-of-range indices fail with
    /// [`BatchingError::IndexOutOfBounds`].
    fn materialize(&self, index: usize) -> Result<SequenceSample>;
}

/// A dataset that keeps all samples in one contiguous `Arc<[SequenceSample]>`.
///
/// Cloning only bumps the `Arc` counter. Lengths are read off the tensors
/// according to the configured [`InputLayout`].
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Arc<[SequenceSample]>,
    layout: InputLayout,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<SequenceSample>, layout: InputLayout) -> Self {
        Self {
            samples: samples.into(),
            layout,
        }
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn get(&self, index: usize) -> Option<&SequenceSample> {
        self.samples.get(index)
    }

    fn sample(&self, index: usize) -> Result<&SequenceSample> {
        self.samples.get(index).ok_or_else(|| {
            BatchingError::IndexOutOfBounds {
                index,
                len: self.samples.len(),
            }
            .into()
        })
    }
}

impl LengthSource for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn lengths(&self, index: usize) -> Result<Lengths> {
        let sample = self.sample(index)?;
        Ok(Lengths::new(
            sample.input_len(self.layout)?,
            sample.output_len(),
        ))
    }
}

impl SequenceDataset for InMemoryDataset {
    fn materialize(&self, index: usize) -> Result<SequenceSample> {
        self.sample(index).cloned()
    }
}

#[cfg(test)]
mod in_memory_dataset_tests {
    use super::*;
    use crate::lengths::LengthIndex;
    use tch::{Device, Kind, Tensor};

    fn frames(t: i64, labels: usize) -> SequenceSample {
        let tokens = (1..=labels as i64).collect();
        SequenceSample::with_full_labels(Tensor::ones(&[t, 4], (Kind::Float, Device::Cpu)), tokens)
    }

    #[test]
    fn reports_lengths_without_copying() -> Result<()> {
        let dataset = InMemoryDataset::new(
            vec![frames(10, 2), frames(3, 1), frames(25, 6)],
            InputLayout::FeatureFrame,
        );
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.lengths(2)?, Lengths::new(25, 6));

        let index = LengthIndex::build(&dataset)?;
        assert_eq!(index.max_input(), 25);
        assert_eq!(index.max_output(), 6);
        Ok(())
    }

    #[test]
    fn materialize_shares_storage() -> Result<()> {
        let dataset = InMemoryDataset::new(vec![frames(5, 1)], InputLayout::FeatureFrame);
        let sample = dataset.materialize(0)?;
        assert_eq!(
            dataset.get(0).map(|s| s.input().data_ptr()),
            Some(sample.input().data_ptr())
        );
        Ok(())
    }

    #[test]
    fn materialize_out_of_range() {
        let dataset = InMemoryDataset::new(vec![frames(5, 1)], InputLayout::FeatureFrame);
        let err = dataset.materialize(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BatchingError>(),
            Some(BatchingError::IndexOutOfBounds { index: 1, len: 1 })
        ));
    }
}
