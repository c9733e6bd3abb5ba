use thiserror::Error;

use crate::batch::Modality;

/// Errors that can occur in lattix-mmkge.
#[derive(Error, Debug)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid model configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// A required pretrained modality table was not supplied.
    #[error("missing pretrained {0} embeddings")]
    MissingModality(Modality),
    /// Tensor shapes do not line up.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// What was being checked.
        context: String,
        /// Expected size or shape.
        expected: String,
        /// Actual size or shape.
        got: String,
    },
    /// Entity index outside `[0, ent_tot)`.
    #[error("entity index {index} out of range (entity count {count})")]
    EntityOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of entities.
        count: usize,
    },
    /// Relation index outside `[0, rel_tot)`.
    #[error("relation index {index} out of range (relation count {count})")]
    RelationOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of relations.
        count: usize,
    },
    /// Fake scoring needs all four substitute vectors.
    #[error("partial modality substitution is not implemented: missing {0}")]
    PartialSubstitution(&'static str),
    /// Operation not supported by the model or configuration.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Named parameter not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Shorthand for [`Error::DimensionMismatch`].
    pub(crate) fn mismatch(
        context: impl Into<String>,
        expected: impl std::fmt::Display,
        got: impl std::fmt::Display,
    ) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// Result type alias for lattix-mmkge.
pub type Result<T> = std::result::Result<T, Error>;
