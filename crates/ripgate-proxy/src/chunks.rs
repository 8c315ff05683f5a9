//! Chunking and per-chunk embedding.
//!
//! Content is split on line boundaries into chunks no larger than the budget
//! (unless a single line is larger). Each chunk is embedded with its own
//! upstream call so failures stay attributable to one chunk.

use std::sync::Arc;

use ripgate_core::{Chunk, EmbeddingError, EmbeddingPort, EmbeddingSettings, EmbeddingVector, Span};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// At or below this many chunks, embedding runs serially.
pub const SERIAL_THRESHOLD: usize = 5;

/// Upper bound on concurrent upstream embedding calls.
pub const MAX_CONCURRENT_EMBEDDINGS: usize = 10;

/// Failure while embedding a chunk sequence.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Embedding chunk {index} failed: {source}")]
    Embedding {
        index: usize,
        #[source]
        source: EmbeddingError,
    },

    /// The fingerprint no longer matches the text extracted from the envelope.
    #[error("Chunk {index} envelope does not match its fingerprint")]
    EnvelopeMismatch { index: usize },

    #[error("Embedding worker for chunk {index} failed: {reason}")]
    Worker { index: usize, reason: String },
}

impl ChunkError {
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Embedding { index, .. }
            | Self::EnvelopeMismatch { index }
            | Self::Worker { index, .. } => *index,
        }
    }
}

/// Splits documents into chunks and embeds them.
#[derive(Clone)]
pub struct ChunkService {
    embedder: Arc<dyn EmbeddingPort>,
    budget: usize,
}

impl ChunkService {
    pub fn new(embedder: Arc<dyn EmbeddingPort>, settings: EmbeddingSettings) -> Self {
        Self::with_budget(embedder, settings.chunk_budget())
    }

    pub fn with_budget(embedder: Arc<dyn EmbeddingPort>, budget: usize) -> Self {
        Self { embedder, budget }
    }

    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    #[must_use]
    pub fn active_model(&self) -> String {
        self.embedder.active_model()
    }

    /// Split `content` into path-labelled chunks.
    ///
    /// Lines keep their terminators, so the unwrapped chunk texts concatenate
    /// back to `content`. Empty content yields one empty chunk.
    #[must_use]
    pub fn split(&self, content: &str, path: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut start_line = 0;
        let mut offset = 0;
        let mut line_no = 0;

        for line in content.split_inclusive('\n') {
            let pending = offset - start;
            if pending > 0 && pending + line.len() > self.budget {
                chunks.push(Chunk::seal(
                    &content[start..offset],
                    path,
                    Span::new(start, offset),
                    Span::new(start_line, line_no),
                ));
                start = offset;
                start_line = line_no;
            }
            offset += line.len();
            line_no += 1;
        }

        if offset > start || chunks.is_empty() {
            chunks.push(Chunk::seal(
                &content[start..offset],
                path,
                Span::new(start, offset),
                Span::new(start_line, line_no),
            ));
        }

        debug!(path = %path, chunks = chunks.len(), budget = self.budget, "Split content");
        chunks
    }

    /// Fill in the embedding of every chunk.
    ///
    /// Chunks embedded before a failure keep their vectors.
    pub async fn embed(&self, chunks: &mut [Chunk]) -> Result<(), ChunkError> {
        if chunks.len() <= SERIAL_THRESHOLD {
            self.embed_serial(chunks).await
        } else {
            self.embed_parallel(chunks).await
        }
    }

    async fn embed_serial(&self, chunks: &mut [Chunk]) -> Result<(), ChunkError> {
        for (index, chunk) in chunks.iter_mut().enumerate() {
            let text = extract_verified(index, chunk)?;
            let vector = self
                .embedder
                .embed_text(text)
                .await
                .map_err(|source| ChunkError::Embedding { index, source })?;
            chunk.embedding = vector;
        }
        Ok(())
    }

    async fn embed_parallel(&self, chunks: &mut [Chunk]) -> Result<(), ChunkError> {
        let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_EMBEDDINGS));
        let mut slots: Vec<Option<Result<EmbeddingVector, ChunkError>>> =
            (0..chunks.len()).map(|_| None).collect();
        let mut workers = JoinSet::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let text = match extract_verified(index, chunk) {
                Ok(text) => text.to_string(),
                Err(e) => {
                    slots[index] = Some(Err(e));
                    continue;
                }
            };
            let embedder = Arc::clone(&self.embedder);
            let permits = Arc::clone(&permits);
            workers.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => embedder
                        .embed_text(&text)
                        .await
                        .map_err(|source| ChunkError::Embedding { index, source }),
                    Err(e) => Err(ChunkError::Worker {
                        index,
                        reason: e.to_string(),
                    }),
                };
                (index, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Embedding worker did not complete: {e}"),
            }
        }

        let mut first_error = None;
        for (index, (chunk, slot)) in chunks.iter_mut().zip(slots).enumerate() {
            let outcome = slot.unwrap_or_else(|| {
                Err(ChunkError::Worker {
                    index,
                    reason: "worker did not complete".to_string(),
                })
            });
            match outcome {
                Ok(vector) => chunk.embedding = vector,
                Err(e) => {
                    warn!(index, "{e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn extract_verified(index: usize, chunk: &Chunk) -> Result<&str, ChunkError> {
    if chunk.verify_fingerprint() {
        Ok(chunk.plain_text())
    } else {
        Err(ChunkError::EnvelopeMismatch { index })
    }
}
