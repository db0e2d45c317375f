//! Error kinds surfaced by the allocation core.

/// Typed failures of the allocation pipeline.
///
/// Non-finite returns and non-finite final weights are not errors; they are
/// coerced to zero where they occur.
#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    /// Not enough price rows or assets to compute a single return row.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A training parameter is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The optimization loop or final inference failed.
    #[error("Training failed: {0}")]
    Training(String),
}

impl From<candle_core::Error> for AllocatorError {
    fn from(e: candle_core::Error) -> Self {
        AllocatorError::Training(e.to_string())
    }
}
