/// Error taxonomy for the training pipeline.
///
/// Numerical degeneracy (singular covariances, zero-norm power-iteration
/// vectors, zero kernel bandwidth) never reaches this enum: it is clamped
/// where it happens.

use thiserror::Error;

/// Result alias used across the crate.
pub type SdccResult<T> = Result<T, SdccError>;

#[derive(Debug, Error)]
pub enum SdccError {
    /// No catalog entry matches the requested dataset identifier.
    #[error("unknown dataset `{0}`")]
    UnknownDataset(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("empty input to {0}")]
    EmptyInput(&'static str),

    /// The joint objective stopped being finite; the step is not applied.
    #[error("non-finite training loss at epoch {epoch}")]
    NonFiniteLoss { epoch: usize },

    #[error("model bundle I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("model bundle (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
