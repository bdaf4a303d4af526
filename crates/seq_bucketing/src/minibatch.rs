use tch::{Device, Tensor};

/// Model-facing buffer group: everything the forward pass consumes.
#[derive(Debug)]
pub struct ModelInputs {
    /// `[N, T_max, ...]` (feature-frame) or `[N, ..., T_max]` (raw-signal), zero-padded.
    pub input: Tensor,
    /// `[N, L_max]`, blank-padded.
    pub labels: Tensor,
    /// `[N]` true input lengths.
    pub input_lens: Tensor,
    /// `[N]` true output lengths.
    pub output_lens: Tensor,
}

/// Loss/metric-facing buffer group. Shares storage with [`ModelInputs`].
#[derive(Debug)]
pub struct LossTargets {
    pub labels: Tensor,
    pub output_lens: Tensor,
    pub input_lens: Tensor,
}

/// How much of a batch's input buffer is padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddingStats {
    pub mean_input: f64,
    pub min_input: i64,
    pub max_input: i64,
    /// Fraction of input cells (along time) that hold padding, in `[0, 1)`.
    pub wasted_fraction: f64,
}

impl PaddingStats {
    pub fn from_lengths(lengths: &[i64]) -> Self {
        if lengths.is_empty() {
            return Self {
                mean_input: 0.0,
                min_input: 0,
                max_input: 0,
                wasted_fraction: 0.0,
            };
        }
        let total: i64 = lengths.iter().sum();
        let min_input = lengths.iter().copied().min().unwrap_or(0);
        let max_input = lengths.iter().copied().max().unwrap_or(0);
        let capacity = max_input * lengths.len() as i64;
        let wasted_fraction = if capacity == 0 {
            0.0
        } else {
            1.0 - total as f64 / capacity as f64
        };
        Self {
            mean_input: total as f64 / lengths.len() as f64,
            min_input,
            max_input,
            wasted_fraction,
        }
    }
}

/// A collated batch of variable-length sequences.
///
/// `inputs` and `targets` carry the same label and length tensors in different
/// groupings, one per downstream consumer. Length tensors hold exactly one
/// entry per sample, in the order the samples appear in the padded buffers.
#[derive(Debug)]
pub struct PaddedBatch {
    pub inputs: ModelInputs,
    pub targets: LossTargets,
    pub stats: PaddingStats,
}

impl PaddedBatch {
    /// Returns the number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        self.inputs.input_lens.size()[0] as usize
    }

    /// Transfers all tensors to the target device (CPU/GPU). Storage shared
    /// between the two groups stays shared on the target device.
    pub fn to_device(&self, device: Device) -> Self {
        let labels = self.inputs.labels.to_device(device);
        let input_lens = self.inputs.input_lens.to_device(device);
        let output_lens = self.inputs.output_lens.to_device(device);
        Self {
            inputs: ModelInputs {
                input: self.inputs.input.to_device(device),
                labels: labels.shallow_clone(),
                input_lens: input_lens.shallow_clone(),
                output_lens: output_lens.shallow_clone(),
            },
            targets: LossTargets {
                labels,
                output_lens,
                input_lens,
            },
            stats: self.stats,
        }
    }
}
