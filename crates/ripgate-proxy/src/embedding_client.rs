//! HTTP client for the upstream embedding API.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::Client;
use ripgate_core::{EmbeddingError, EmbeddingPort, EmbeddingVector, UpstreamConfig};
use tracing::{debug, warn};

use crate::forward::{UpstreamError, post_json};
use crate::models::{UpstreamEmbeddingRequest, UpstreamEmbeddingResponse};

/// Calls the embedding upstream, one request per text or batch.
///
/// The active model is shared mutable state: dispatch takes a read lock,
/// `set_model` takes the write lock.
pub struct EmbeddingClient {
    http: Client,
    upstream: Arc<UpstreamConfig>,
    dimensions: usize,
    model: RwLock<String>,
}

impl EmbeddingClient {
    #[must_use]
    pub fn new(http: Client, upstream: UpstreamConfig, dimensions: usize) -> Self {
        let model = RwLock::new(upstream.model.clone());
        Self {
            http,
            upstream: Arc::new(upstream),
            dimensions,
            model,
        }
    }

    /// A fresh client sharing the HTTP pool, starting from the configured model.
    ///
    /// Used for per-request model overrides so they never leak across requests.
    #[must_use]
    pub fn scoped(&self) -> Self {
        Self {
            http: self.http.clone(),
            upstream: Arc::clone(&self.upstream),
            dimensions: self.dimensions,
            model: RwLock::new(self.upstream.model.clone()),
        }
    }

    pub fn set_model(&self, model: impl Into<String>) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model.into();
    }

    #[must_use]
    pub fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a batch of texts in one upstream call.
    pub async fn embeddings(
        &self,
        inputs: &[String],
        dimensions: Option<usize>,
    ) -> Result<UpstreamEmbeddingResponse, EmbeddingError> {
        if !self.upstream.is_configured() {
            return Err(EmbeddingError::NotConfigured);
        }

        let model = self.model();
        let request = UpstreamEmbeddingRequest {
            model: &model,
            input: inputs,
            dimensions: dimensions.unwrap_or(self.dimensions),
        };
        debug!(model = %model, inputs = inputs.len(), "Requesting embeddings");

        let response = post_json(
            &self.http,
            &self.upstream.base_url,
            &self.upstream.api_key,
            &request,
        )
        .await
        .map_err(|e| match e {
            UpstreamError::Timeout => EmbeddingError::Timeout,
            UpstreamError::Transport(reason) => EmbeddingError::Request(reason),
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::Request(e.to_string())
            }
        })?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(status = status.as_u16(), body = %body, "Embedding upstream returned an error");
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_slice(&body).map_err(|e| EmbeddingError::Decode(e.to_string()))
    }

    /// Embed a single text.
    pub async fn embedding(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let response = self.embeddings(&[text.to_string()], None).await?;
        let model = if response.model.is_empty() {
            self.model()
        } else {
            response.model
        };
        response
            .data
            .into_iter()
            .next()
            .map(|data| EmbeddingVector::new(data.embedding, model))
            .ok_or(EmbeddingError::Empty)
    }
}

#[async_trait]
impl EmbeddingPort for EmbeddingClient {
    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        self.embedding(text).await
    }

    fn active_model(&self) -> String {
        self.model()
    }
}
