/// Embedding provider trait and failure taxonomy
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    /// Missing or rejected credential, bad backend identity. Fatal, never retried.
    #[error("Provider configuration error: {0}")]
    Configuration(String),

    /// Rate limiting or server-side failure. Retryable by the caller.
    #[error("Transient provider failure: {0}")]
    Transient(String),

    /// Returned vector length disagrees with the collection dimension. Fatal.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Schema { expected: usize, actual: usize },

    /// A batch response did not match the request positionally.
    #[error("Provider returned {got} vectors for {want} inputs")]
    CountMismatch { want: usize, got: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EmbedError {
    /// Whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbedError::Transient(_) | EmbedError::CountMismatch { .. }
        )
    }
}

/// Trait for embedding providers
///
/// Implementations hide whether the backend batches natively: callers
/// always submit ordered batches and get back one vector per input, in
/// input order. Providers hold no shared mutable state; their only side
/// effects are outbound network calls.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for the given texts, preserving order and count
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Stable identifier of the backend (cache key component)
    fn provider_id(&self) -> &str;

    /// Model identifier (cache key component)
    fn model_id(&self) -> &str;

    /// One-shot probe embedding, used for dimension discovery
    async fn probe(&self) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&["dimension probe".to_string()]).await?;
        vectors
            .pop()
            .ok_or(EmbedError::CountMismatch { want: 1, got: 0 })
    }
}

/// Map an HTTP transport error onto the failure taxonomy
pub(crate) fn classify_request_error(err: reqwest::Error) -> EmbedError {
    if err.is_timeout() || err.is_connect() {
        EmbedError::Transient(err.to_string())
    } else if err.is_builder() {
        EmbedError::Configuration(err.to_string())
    } else {
        EmbedError::Transient(err.to_string())
    }
}

/// Map an HTTP status onto the failure taxonomy
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> EmbedError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        EmbedError::Transient(format!("HTTP {}: {}", status, body))
    } else {
        // Remaining 4xx responses will not heal on retry: bad credential,
        // unknown model, malformed request.
        EmbedError::Configuration(format!("HTTP {}: {}", status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EmbedError::Transient("429".into()).is_retryable());
        assert!(EmbedError::CountMismatch { want: 2, got: 1 }.is_retryable());
        assert!(!EmbedError::Configuration("no key".into()).is_retryable());
        assert!(!EmbedError::Schema {
            expected: 384,
            actual: 768
        }
        .is_retryable());
    }

    #[test]
    fn test_status_classification() {
        let transient = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(transient.is_retryable());

        let transient = classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(transient.is_retryable());

        let fatal = classify_status(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(!fatal.is_retryable());
    }
}
