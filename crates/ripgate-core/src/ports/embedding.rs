//! Embedding port.
//!
//! The chunk pipeline depends on this trait rather than on the HTTP client,
//! so tests can substitute a deterministic in-process embedder.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::EmbeddingVector;

/// Errors from a single-text embedding call.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// No embedding upstream is configured.
    #[error("Embedding upstream is not configured")]
    NotConfigured,

    /// The outbound call exceeded its deadline.
    #[error("Embedding request timed out")]
    Timeout,

    /// Transport-level failure (connect, TLS, body read).
    #[error("Embedding request failed: {0}")]
    Request(String),

    /// Upstream answered with a non-success status.
    #[error("Embedding API returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Upstream body did not match the expected shape.
    #[error("Failed to decode embedding response: {0}")]
    Decode(String),

    /// Upstream answered successfully but without any vector.
    #[error("No embeddings returned")]
    Empty,
}

/// Produces one embedding vector per text.
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    /// Embed a single text with the currently active model.
    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;

    /// Model name used for new embeddings.
    fn active_model(&self) -> String;
}
