//! API data models for the gateway's HTTP surface.
//!
//! Chat bodies are handled as untyped `serde_json::Value` documents so that
//! unrecognised fields pass through untouched; only the embedding and chunk
//! endpoints have typed request bodies.

use ripgate_core::{Chunk, EmbeddingError};
use serde::{Deserialize, Serialize};

// =============================================================================
// Streaming Chat Types (canned responses)
// =============================================================================

/// Streaming chunk in OpenAI `chat.completion.chunk` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub model: String,
    pub created: i64,
    pub choices: Vec<ChatChunkChoice>,
}

/// A single streaming choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDelta {
    pub role: String,
    pub content: String,
}

// =============================================================================
// Embedding Types
// =============================================================================

/// Request body for `POST /embeddings`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsApiRequest {
    /// Texts to embed.
    pub inputs: Vec<String>,
    /// Optional model override for this request.
    #[serde(default, rename = "embedding_model")]
    pub model: Option<String>,
    /// Optional dimension override for this request.
    #[serde(default)]
    pub dimensions: Option<usize>,
}

/// Body sent to the upstream embedding API.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamEmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
    pub dimensions: usize,
}

/// OpenAI-style response from the upstream embedding API.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEmbeddingResponse {
    #[serde(default)]
    pub data: Vec<EmbeddingData>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub usage: Usage,
}

/// A single embedding entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub object: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Response body for `POST /embeddings`, re-keyed for the client.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsApiResponse {
    pub embeddings: Vec<EmbeddingData>,
    pub embedding_model: String,
    pub object: String,
    pub usage: Usage,
}

impl From<UpstreamEmbeddingResponse> for EmbeddingsApiResponse {
    fn from(upstream: UpstreamEmbeddingResponse) -> Self {
        Self {
            embeddings: upstream.data,
            embedding_model: upstream.model,
            object: upstream.object,
            usage: upstream.usage,
        }
    }
}

// =============================================================================
// Chunk Endpoint Types
// =============================================================================

/// Request body for `POST /chunks`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkRequest {
    pub content: String,
    pub path: String,
    /// Compute embeddings for every chunk before responding.
    #[serde(default)]
    pub embed: bool,
}

/// Response body for `POST /chunks`.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub chunks: Vec<Chunk>,
    pub embedding_model: String,
}

// =============================================================================
// Error Response Types
// =============================================================================

/// Error response matching OpenAI format.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail within an error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: error_type.into(),
                code: None,
            },
        }
    }

    /// Create an error response with a code.
    pub fn with_code(
        message: impl Into<String>,
        error_type: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: error_type.into(),
                code: Some(code.into()),
            },
        }
    }

    /// Malformed or incomplete client request.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_code(message, "invalid_request_error", "invalid_request")
    }

    /// The upstream for this route has no endpoint configured.
    pub fn not_configured(role: &str) -> Self {
        Self::with_code(
            format!("No {role} upstream is configured"),
            "service_unavailable",
            "upstream_not_configured",
        )
    }

    /// Upstream transport failure.
    pub fn upstream_error(reason: &str) -> Self {
        Self::with_code(
            format!("Failed to reach upstream: {reason}"),
            "server_error",
            "upstream_error",
        )
    }

    /// Upstream call exceeded its deadline.
    pub fn upstream_timeout() -> Self {
        Self::with_code("Upstream request timed out", "server_error", "timeout")
    }
}

impl From<&EmbeddingError> for ErrorResponse {
    fn from(err: &EmbeddingError) -> Self {
        match err {
            EmbeddingError::NotConfigured => Self::not_configured("embedding"),
            EmbeddingError::Timeout => Self::upstream_timeout(),
            other => Self::upstream_error(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_response_is_rekeyed() {
        let upstream: UpstreamEmbeddingResponse = serde_json::from_str(
            r#"{"object":"list","model":"bge-m3","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"usage":{"prompt_tokens":3,"total_tokens":3}}"#,
        )
        .unwrap();

        let json = serde_json::to_value(EmbeddingsApiResponse::from(upstream)).unwrap();
        assert_eq!(json["embedding_model"], "bge-m3");
        assert_eq!(json["embeddings"][0]["embedding"][1].as_f64().unwrap() as f32, 0.2);
        assert_eq!(json["usage"]["total_tokens"], 3);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_embeddings_request_aliases() {
        let req: EmbeddingsApiRequest =
            serde_json::from_str(r#"{"inputs":["a","b"],"embedding_model":"m","dimensions":512}"#)
                .unwrap();
        assert_eq!(req.inputs.len(), 2);
        assert_eq!(req.model.as_deref(), Some("m"));
        assert_eq!(req.dimensions, Some(512));

        let bare: EmbeddingsApiRequest = serde_json::from_str(r#"{"inputs":[]}"#).unwrap();
        assert!(bare.model.is_none());
    }

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_value(ErrorResponse::invalid_request("bad body")).unwrap();
        assert_eq!(json["error"]["message"], "bad body");
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(json["error"]["code"], "invalid_request");

        let plain = serde_json::to_value(ErrorResponse::new("x", "server_error")).unwrap();
        assert!(plain["error"].get("code").is_none());
    }
}
