//! Error types for bon-diffusion.

use thiserror::Error;

/// Result type alias for bon-diffusion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bon-diffusion.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed task arguments, rejected before any work begins.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A reward scorer raised while scoring a batch.
    #[error("scoring failed: {0}")]
    Scoring(String),

    /// Post-loop scoring failed while attempts remain in the retry budget.
    #[error("scoring failed on attempt {attempt} (retry budget {budget}); retry the task")]
    ScoringRetry { attempt: usize, budget: usize },

    /// A reference-conditioned scorer was used without a target.
    #[error("reference-conditioned scorer has no target; call with_target first")]
    MissingTarget,

    /// Candidate pool layout invariant was violated.
    #[error("pool shape error: {0}")]
    PoolShape(String),

    /// Model loading failed.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
