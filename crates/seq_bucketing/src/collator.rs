use crate::error::BatchingError;
use crate::minibatch::{LossTargets, ModelInputs, PaddedBatch, PaddingStats};
use crate::sample::SequenceSample;
use anyhow::Result;
use tch::{Kind, Tensor};

/// A `Collator` defines how a list of materialized samples is combined into one
/// batch value.
pub trait Collator<S> {
    type Batch;

    fn collate(&self, samples: &[S]) -> Result<Self::Batch>;
}

/// Where the time axis sits in a sample's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputLayout {
    /// Time is the first axis of a sample (`[T, F, ...]`), so the second axis
    /// of the batch (`[N, T, F, ...]`). Stacked filterbank frames use this.
    #[default]
    FeatureFrame,
    /// Time is the last axis of a sample (`[C, T]`) and of the batch
    /// (`[N, C, T]`). Raw waveforms use this.
    RawSignal,
}

impl InputLayout {
    /// Time axis of a sample tensor of the given rank; `None` for scalars.
    pub fn time_axis(self, rank: usize) -> Option<usize> {
        match (self, rank) {
            (_, 0) => None,
            (InputLayout::FeatureFrame, _) => Some(0),
            (InputLayout::RawSignal, rank) => Some(rank - 1),
        }
    }

    /// Batch shape for `batch_size` samples whose non-time dims are `dims`.
    fn batch_shape(self, batch_size: i64, time: i64, dims: &[i64]) -> Vec<i64> {
        let mut shape = Vec::with_capacity(dims.len() + 2);
        shape.push(batch_size);
        match self {
            InputLayout::FeatureFrame => {
                shape.push(time);
                shape.extend_from_slice(dims);
            }
            InputLayout::RawSignal => {
                shape.extend_from_slice(dims);
                shape.push(time);
            }
        }
        shape
    }
}

/// Pads variable-length [`SequenceSample`]s into one [`PaddedBatch`].
///
/// Inputs are zero-padded along the time axis up to the longest input in the
/// batch and cast to `f32`. Labels are padded with `blank_label` up to the
/// longest output length; only the first `output_len` tokens of each label
/// buffer are copied. Neither dimension is clamped to a fixed size.
///
/// # Example
/// ```ignore
/// let collator = SequenceCollator::new(InputLayout::RawSignal).with_blank_label(0);
/// let batch = collator.collate(&samples)?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceCollator {
    layout: InputLayout,
    blank_label: i64,
}

impl SequenceCollator {
    pub fn new(layout: InputLayout) -> Self {
        Self {
            layout,
            blank_label: 0,
        }
    }

    pub fn with_blank_label(mut self, blank: i64) -> Self {
        self.blank_label = blank;
        self
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn blank_label(&self) -> i64 {
        self.blank_label
    }

    /// Non-time dims shared by every sample, and each sample's time length.
    fn validate_shapes(&self, samples: &[SequenceSample]) -> Result<(Vec<i64>, Vec<i64>)> {
        let mut reference: Option<Vec<i64>> = None;
        let mut time_lens = Vec::with_capacity(samples.len());

        for (i, sample) in samples.iter().enumerate() {
            let shape = sample.input().size();
            let axis = match self.layout.time_axis(shape.len()) {
                Some(axis) => axis,
                None => {
                    return Err(BatchingError::ShapeMismatch {
                        sample: i,
                        expected: reference.unwrap_or_default(),
                        got: shape,
                    }
                    .into())
                }
            };
            let mut dims = shape.clone();
            time_lens.push(dims.remove(axis));

            match &reference {
                None => reference = Some(dims),
                Some(expected) if *expected != dims => {
                    return Err(BatchingError::ShapeMismatch {
                        sample: i,
                        expected: expected.clone(),
                        got: shape,
                    }
                    .into())
                }
                Some(_) => {}
            }
        }
        Ok((reference.unwrap_or_default(), time_lens))
    }
}

impl Collator<SequenceSample> for SequenceCollator {
    type Batch = PaddedBatch;

    fn collate(&self, samples: &[SequenceSample]) -> Result<PaddedBatch> {
        if samples.is_empty() {
            return Err(BatchingError::EmptyBatch.into());
        }

        // 1. Validate shapes and compute batch maxima
        let (dims, input_lens) = self.validate_shapes(samples)?;
        let output_lens: Vec<i64> = samples.iter().map(|s| s.output_len() as i64).collect();
        let max_in = input_lens.iter().copied().max().unwrap_or(0);
        let max_out = output_lens.iter().copied().max().unwrap_or(0);
        let n = samples.len() as i64;
        let device = samples[0].input().device();

        // 2. Zero-filled input buffer, copy each sample's frames in
        let shape = self.layout.batch_shape(n, max_in, &dims);
        let input = Tensor::zeros(shape.as_slice(), (Kind::Float, device));
        // Time axis inside a per-sample slice of the batch buffer.
        let slice_axis = match self.layout {
            InputLayout::FeatureFrame => 0,
            InputLayout::RawSignal => dims.len() as i64,
        };
        for (i, (sample, &len)) in samples.iter().zip(&input_lens).enumerate() {
            let len = len.min(max_in);
            if len == 0 {
                continue;
            }
            let source = sample
                .input()
                .to_device(device)
                .to_kind(Kind::Float)
                .narrow(slice_axis, 0, len);
            input
                .select(0, i as i64)
                .narrow(slice_axis, 0, len)
                .copy_(&source);
        }

        // 3. Blank-filled label buffer, copy the meaningful prefix of each sequence
        let labels = Tensor::full(
            &[n, max_out],
            self.blank_label,
            (Kind::Int64, device),
        );
        for (i, sample) in samples.iter().enumerate() {
            let tokens = sample.label_tokens();
            if tokens.is_empty() {
                continue;
            }
            let source = Tensor::from_slice(tokens).to_device(device);
            labels
                .select(0, i as i64)
                .narrow(0, 0, tokens.len() as i64)
                .copy_(&source);
        }

        // 4. True lengths, in batch order
        let stats = PaddingStats::from_lengths(&input_lens);
        tracing::debug!(
            batch_size = n,
            mean_input = stats.mean_input,
            min_input = stats.min_input,
            max_input = stats.max_input,
            wasted_fraction = stats.wasted_fraction,
            "collated padded batch"
        );
        let input_lens = Tensor::from_slice(&input_lens).to_device(device);
        let output_lens = Tensor::from_slice(&output_lens).to_device(device);

        Ok(PaddedBatch {
            inputs: ModelInputs {
                input,
                labels: labels.shallow_clone(),
                input_lens: input_lens.shallow_clone(),
                output_lens: output_lens.shallow_clone(),
            },
            targets: LossTargets {
                labels,
                output_lens,
                input_lens,
            },
            stats,
        })
    }
}

#[cfg(test)]
mod sequence_collator_tests {
    use super::*;
    use tch::Device;

    fn feature_sample(frames: i64, features: i64, labels: Vec<i64>) -> SequenceSample {
        let input = Tensor::arange(frames * features, (Kind::Float, Device::Cpu))
            .reshape(&[frames, features])
            + 1.0;
        SequenceSample::with_full_labels(input, labels)
    }

    #[test]
    fn pads_feature_frames_to_longest() -> Result<()> {
        let samples = vec![
            feature_sample(7, 2, vec![4, 5, 6]),
            feature_sample(3, 2, vec![9]),
        ];
        let batch = SequenceCollator::new(InputLayout::FeatureFrame).collate(&samples)?;
        let input = &batch.inputs.input;

        assert_eq!(input.size(), &[2, 7, 2]);
        let tail = input.select(0, 1).narrow(0, 3, 4);
        assert!(tail.equal(&Tensor::zeros(&[4, 2], (Kind::Float, Device::Cpu))));

        let input_lens: Vec<i64> = Vec::try_from(&batch.inputs.input_lens)?;
        let output_lens: Vec<i64> = Vec::try_from(&batch.inputs.output_lens)?;
        assert_eq!(input_lens, vec![7, 3]);
        assert_eq!(output_lens, vec![3, 1]);
        assert_eq!(batch.batch_size(), 2);
        Ok(())
    }

    #[test]
    fn slicing_back_reproduces_samples() -> Result<()> {
        let samples = vec![
            feature_sample(2, 3, vec![1]),
            feature_sample(5, 3, vec![7, 8, 9, 10]),
            feature_sample(4, 3, vec![2, 2]),
        ];
        let batch = SequenceCollator::new(InputLayout::FeatureFrame).collate(&samples)?;

        for (i, sample) in samples.iter().enumerate() {
            let t = sample.input_len(InputLayout::FeatureFrame)? as i64;
            let restored = batch.inputs.input.select(0, i as i64).narrow(0, 0, t);
            assert!(restored.equal(sample.input()));

            let out = sample.output_len() as i64;
            let tokens: Vec<i64> =
                Vec::try_from(&batch.targets.labels.select(0, i as i64).narrow(0, 0, out))?;
            assert_eq!(tokens, sample.label_tokens());
        }
        Ok(())
    }

    #[test]
    fn raw_signal_pads_last_axis() -> Result<()> {
        let long = SequenceSample::with_full_labels(
            Tensor::ones(&[1, 6], (Kind::Float, Device::Cpu)),
            vec![3, 3],
        );
        let short = SequenceSample::with_full_labels(
            Tensor::ones(&[1, 2], (Kind::Float, Device::Cpu)),
            vec![1],
        );
        let batch = SequenceCollator::new(InputLayout::RawSignal).collate(&[long, short])?;

        assert_eq!(batch.inputs.input.size(), &[2, 1, 6]);
        let expected = Tensor::from_slice(&[1.0f32, 1.0, 0.0, 0.0, 0.0, 0.0]).reshape(&[1, 6]);
        assert!(batch.inputs.input.select(0, 1).equal(&expected));
        let input_lens: Vec<i64> = Vec::try_from(&batch.targets.input_lens)?;
        assert_eq!(input_lens, vec![6, 2]);
        Ok(())
    }

    #[test]
    fn labels_use_blank_and_ignore_physical_tail() -> Result<()> {
        let padded_store = SequenceSample::new(
            Tensor::ones(&[2, 1], (Kind::Float, Device::Cpu)),
            vec![5, 6, 99, 99],
            2,
        )?;
        let short = SequenceSample::with_full_labels(
            Tensor::ones(&[2, 1], (Kind::Float, Device::Cpu)),
            vec![8],
        );
        let batch = SequenceCollator::new(InputLayout::FeatureFrame)
            .with_blank_label(-1)
            .collate(&[padded_store, short])?;

        assert_eq!(batch.targets.labels.size(), &[2, 2]);
        let labels: Vec<i64> = Vec::try_from(&batch.targets.labels.reshape(&[-1]))?;
        assert_eq!(labels, vec![5, 6, 8, -1]);
        Ok(())
    }

    #[test]
    fn non_time_dim_mismatch_is_fatal() {
        let samples = vec![feature_sample(4, 2, vec![1]), feature_sample(4, 3, vec![1])];
        let err = SequenceCollator::new(InputLayout::FeatureFrame)
            .collate(&samples)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BatchingError>(),
            Some(BatchingError::ShapeMismatch { sample: 1, .. })
        ));
    }

    #[test]
    fn rank_mismatch_is_fatal() {
        let samples = vec![
            feature_sample(4, 2, vec![1]),
            SequenceSample::with_full_labels(
                Tensor::ones(&[4], (Kind::Float, Device::Cpu)),
                vec![1],
            ),
        ];
        let result = SequenceCollator::new(InputLayout::FeatureFrame).collate(&samples);
        assert!(result.is_err());
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = SequenceCollator::default()
            .collate(&[])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BatchingError>(),
            Some(BatchingError::EmptyBatch)
        ));
    }

    #[test]
    fn groups_share_length_arrays() -> Result<()> {
        let samples = vec![feature_sample(3, 1, vec![1, 2]), feature_sample(1, 1, vec![])];
        let batch = SequenceCollator::default().collate(&samples)?;
        assert!(batch.inputs.output_lens.equal(&batch.targets.output_lens));
        assert!(batch.inputs.input_lens.equal(&batch.targets.input_lens));
        assert!(batch.inputs.labels.equal(&batch.targets.labels));
        Ok(())
    }
}
