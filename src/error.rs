//! Error types for the query and ingestion pipelines.
//!
//! [`Error`] is the taxonomy surfaced at the orchestrator boundary. The
//! component errors ([`EmbedError`], [`IndexError`], [`RerankError`],
//! [`GenerationError`]) carry backend detail for server-side logs and are
//! translated into an [`Error`] before anything reaches a caller.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors, as seen by callers of the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty or malformed question; rejected before any retrieval work.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The orchestrator has not finished initialization.
    #[error("service unavailable: {}", .0.as_deref().unwrap_or("pipeline not initialized"))]
    NotReady(Option<String>),

    /// Embedding, reranking, or generation backend cannot be reached.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The vector index holds zero chunks.
    #[error("vector index is empty")]
    IndexEmpty,

    /// Generation model was reachable but produced no usable output.
    #[error("generation failed: {0}")]
    GenerationFailure(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Stable, sanitized class name. This is the only error detail that may
    /// be placed in an answer's metadata.
    pub fn class(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "InvalidInput",
            Error::NotReady(_) => "NotReady",
            Error::ModelUnavailable(_) => "ModelUnavailable",
            Error::IndexEmpty => "IndexEmpty",
            Error::GenerationFailure(_) => "GenerationFailure",
        }
    }
}

/// Embedding backend failures.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("embedding backend error: {0}")]
    Backend(String),

    #[error("embedding has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// Vector index failures.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector contains NaN or infinite components")]
    NonFinite,

    #[error("index was built with model '{index}' but the embedder is '{embedder}'")]
    ModelMismatch { index: String, embedder: String },

    #[error("index snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index snapshot is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reranker failures.
#[derive(Debug, Error)]
pub enum RerankError {
    #[error("reranker backend error: {0}")]
    Backend(String),
}

/// Generation model failures.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The model endpoint could not be reached.
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),

    /// The model answered, but with nothing usable.
    #[error("generation backend returned empty output")]
    EmptyOutput,

    /// The model endpoint answered with an error.
    #[error("generation backend error: {0}")]
    Backend(String),
}

impl From<EmbedError> for Error {
    fn from(err: EmbedError) -> Self {
        Error::ModelUnavailable(err.to_string())
    }
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Self {
        // A query vector the index cannot use means the embedding side is
        // misconfigured for this corpus.
        Error::ModelUnavailable(err.to_string())
    }
}

impl From<RerankError> for Error {
    fn from(err: RerankError) -> Self {
        Error::ModelUnavailable(err.to_string())
    }
}

impl From<GenerationError> for Error {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Unavailable(msg) => Error::ModelUnavailable(msg),
            other => Error::GenerationFailure(other.to_string()),
        }
    }
}
