//! Error taxonomy for the aggregation & retrieval core

use thiserror::Error;

/// Failure of a single wrapped provider call.
///
/// None of these ever fail a request on their own; they end up in the
/// per-source error map of the aggregate result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("circuit open, retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("rate limited: no token available before the request deadline")]
    RateLimited,

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider call timed out after {0}ms")]
    CallTimeout(u64),

    #[error("request deadline exceeded before provider responded")]
    DeadlineExceeded,

    #[error("request cancelled")]
    Cancelled,

    #[error("provider task failed: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Errors that say something about the provider itself and therefore
    /// count toward its circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::CallTimeout(_))
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("build '{0}' has an empty or zero embedding vector")]
    ZeroVector(String),

    #[error("duplicate build id '{0}'")]
    DuplicateId(String),

    #[error("failed to read knowledge base: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse knowledge base: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("request deadline exceeded during embedding")]
    DeadlineExceeded,

    #[error("request cancelled during retrieval")]
    Cancelled,

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("score weight '{name}' must be finite and non-negative, got {value}")]
    InvalidWeight { name: &'static str, value: f32 },

    #[error("score weights must not all be zero")]
    ZeroWeights,

    #[error("unvalidated_penalty must be within [0, 1], got {0}")]
    InvalidPenalty(f32),

    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
}

/// Request-level failure. Only malformed input or configuration ends up here;
/// degraded dependencies are reported inside the result instead.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("knowledge base error: {0}")]
    Index(#[from] IndexError),
}

impl RequestError {
    /// True when the caller sent something malformed (as opposed to a
    /// deployment problem).
    pub fn is_client_error(&self) -> bool {
        matches!(self, RequestError::InvalidQuery(_) | RequestError::InvalidOptions(_))
    }
}
