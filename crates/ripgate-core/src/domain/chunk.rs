//! Chunk and embedding-vector domain types.

use serde::{Deserialize, Serialize};

use super::envelope;

/// Half-open `[start, end)` range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Embedding attached to a single chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    #[serde(rename = "embedding")]
    pub values: Vec<f32>,
    /// Model that produced the vector; empty until embedded.
    #[serde(default)]
    pub model: String,
}

impl EmbeddingVector {
    #[must_use]
    pub fn new(values: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            values,
            model: model.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A bounded, path-labelled slice of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Fingerprint of the unwrapped chunk text.
    pub hash: String,
    /// Chunk text inside the path envelope.
    pub text: String,
    /// Byte offsets into the source document.
    pub range: Span,
    /// 0-based line numbers into the source document.
    pub line_range: Span,
    pub embedding: EmbeddingVector,
}

impl Chunk {
    /// Seal `body` into a chunk labelled with `path`.
    #[must_use]
    pub fn seal(body: &str, path: &str, range: Span, line_range: Span) -> Self {
        Self {
            hash: envelope::fingerprint(body),
            text: envelope::wrap(path, body),
            range,
            line_range,
            embedding: EmbeddingVector::default(),
        }
    }

    /// Text with the envelope removed; this is what gets embedded.
    #[must_use]
    pub fn plain_text(&self) -> &str {
        envelope::unwrap(&self.text)
    }

    /// True when the fingerprint recomputed from `plain_text` matches `hash`.
    #[must_use]
    pub fn verify_fingerprint(&self) -> bool {
        envelope::fingerprint(self.plain_text()) == self.hash
    }
}
