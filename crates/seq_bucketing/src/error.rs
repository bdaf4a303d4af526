use thiserror::Error;

/// Fatal conditions raised by the batching core.
///
/// Every public API returns `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` and can be recovered with `err.downcast_ref::<BatchingError>()`.
/// None of them are retried: they indicate a bad configuration, a caller defect,
/// or an upstream feature-extraction defect.
#[derive(Debug, Error)]
pub enum BatchingError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("index {index} out of bounds for dataset of size {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("shape mismatch in sample {sample}: expected non-time dims {expected:?}, got {got:?}")]
    ShapeMismatch {
        sample: usize,
        expected: Vec<i64>,
        got: Vec<i64>,
    },

    #[error("cannot collate an empty sample list")]
    EmptyBatch,

    #[error("output length {output_len} exceeds label buffer length {physical}")]
    LabelLength { output_len: usize, physical: usize },
}
