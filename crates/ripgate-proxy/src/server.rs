//! Axum router for the gateway's HTTP surface.
//!
//! The router is protocol-agnostic: the runtime crate serves the same
//! `Router` on both the plaintext and the TLS listener.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use reqwest::Client;
use ripgate_core::{EmbeddingError, EmbeddingPort, GatewayConfig};
use tower::ServiceBuilder;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::chunks::{ChunkError, ChunkService};
use crate::embedding_client::EmbeddingClient;
use crate::forward::{build_upstream_client, dispatch};
use crate::models::{
    ChunkRequest, ChunkResponse, EmbeddingsApiRequest, EmbeddingsApiResponse, ErrorResponse,
};
use crate::probes::ProbeTable;
use crate::transform::{ClientMetadata, Plan, ShortCircuit, TransformError, TransformPipeline};

/// Response header carrying a fresh identifier for every request.
pub const REQUEST_ID_HEADER: &str = "x-github-request-id";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<TransformPipeline>,
    /// HTTP client for forwarding requests upstream.
    client: Client,
    embeddings: Arc<EmbeddingClient>,
    chunks: ChunkService,
}

impl AppState {
    /// Build every handler dependency from the configuration.
    pub fn from_config(config: &GatewayConfig, probes: ProbeTable) -> anyhow::Result<Self> {
        let client = build_upstream_client(config.request_timeout)?;
        let embeddings = Arc::new(EmbeddingClient::new(
            client.clone(),
            config.embedding.clone(),
            config.embedding_settings.dimensions,
        ));
        let embedder: Arc<dyn EmbeddingPort> = embeddings.clone();

        Ok(Self {
            pipeline: Arc::new(TransformPipeline::new(config, probes)),
            client,
            embeddings,
            chunks: ChunkService::new(embedder, config.embedding_settings),
        })
    }
}

/// Build the router with all routes and response middleware.
pub fn create_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(REQUEST_ID_HEADER),
            |_: &Response| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok(),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=0"),
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/chat/completions", post(chat_completions))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/agents/chat", post(chat_completions))
        .route("/v1/engines/copilot-codex", post(code_completions))
        .route("/v1/engines/{model}/completions", post(code_completions))
        .route("/embeddings", post(embeddings))
        .route("/chunks", post(chunks))
        .layer(middleware)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let client = ClientMetadata::new(user_agent);

    match state.pipeline.plan_chat(&body, &client) {
        Ok(Plan::Upstream(call)) => {
            info!(
                upstream = call.role.as_str(),
                user_agent = %client.user_agent,
                "Processing chat completion request"
            );
            dispatch(&state.client, &call).await
        }
        Ok(Plan::ShortCircuit(answer)) => short_circuit_response(answer),
        Err(e) => transform_error_response(&e),
    }
}

async fn code_completions(State(state): State<AppState>, body: Bytes) -> Response {
    match state.pipeline.plan_code_completion(&body) {
        Ok(call) => {
            debug!("Processing code completion request");
            dispatch(&state.client, &call).await
        }
        Err(e) => transform_error_response(&e),
    }
}

async fn embeddings(State(state): State<AppState>, body: Bytes) -> Response {
    let request: EmbeddingsApiRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return bad_request(format!("Invalid request body: {e}")),
    };
    if request.inputs.is_empty() {
        return bad_request("inputs must not be empty");
    }

    let client = state.embeddings.scoped();
    if let Some(model) = request.model.filter(|m| !m.is_empty()) {
        client.set_model(model);
    }

    debug!(inputs = request.inputs.len(), model = %client.model(), "Processing embeddings request");
    match client.embeddings(&request.inputs, request.dimensions).await {
        Ok(upstream) => Json(EmbeddingsApiResponse::from(upstream)).into_response(),
        Err(e) => embedding_error_response(&e),
    }
}

async fn chunks(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ChunkRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return bad_request(format!("Invalid request body: {e}")),
    };
    if request.content.is_empty() || request.path.is_empty() {
        return bad_request("content and path are required");
    }
    // The envelope header is a single line.
    if request.path.contains(['\n', '\r']) {
        return bad_request("path must not contain line breaks");
    }

    let mut chunks = state.chunks.split(&request.content, &request.path);
    info!(path = %request.path, chunks = chunks.len(), embed = request.embed, "Processing chunks request");

    if request.embed
        && let Err(e) = state.chunks.embed(&mut chunks).await
    {
        error!("Chunk embedding failed: {e}");
        return match &e {
            ChunkError::Embedding { source, .. } => embedding_error_response(source),
            ChunkError::EnvelopeMismatch { .. } | ChunkError::Worker { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string(), "server_error")),
            )
                .into_response(),
        };
    }

    Json(ChunkResponse {
        chunks,
        embedding_model: state.chunks.active_model(),
    })
    .into_response()
}

fn short_circuit_response(answer: ShortCircuit) -> Response {
    debug!(rule = %answer.rule, "Short-circuited request");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(answer.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::invalid_request(message)),
    )
        .into_response()
}

fn transform_error_response(err: &TransformError) -> Response {
    match err {
        TransformError::InvalidJson(_) | TransformError::NotAnObject => {
            bad_request(err.to_string())
        }
        TransformError::UpstreamNotConfigured(role) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::not_configured(role.as_str())),
        )
            .into_response(),
    }
}

/// Map an embedding failure to a status and OpenAI-style body.
fn embedding_error_response(err: &EmbeddingError) -> Response {
    let status = match err {
        EmbeddingError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        EmbeddingError::Timeout => StatusCode::REQUEST_TIMEOUT,
        EmbeddingError::Request(_)
        | EmbeddingError::Status { .. }
        | EmbeddingError::Decode(_)
        | EmbeddingError::Empty => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ErrorResponse::from(err))).into_response()
}
