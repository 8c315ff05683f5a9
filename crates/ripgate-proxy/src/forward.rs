//! Upstream forwarding with streaming pass-through.
//!
//! Responses are never buffered or re-framed: the upstream body is handed to
//! axum as a byte stream so server-sent-event framing reaches the client
//! exactly as produced. Nothing here retries.

use std::time::Duration;

use axum::{
    Json,
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::models::ErrorResponse;
use crate::transform::UpstreamCall;

/// Errors from a single outbound call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream request timed out")]
    Timeout,

    #[error("Failed to reach upstream: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        match self {
            Self::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                Json(ErrorResponse::upstream_timeout()),
            )
                .into_response(),
            Self::Transport(reason) => (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::upstream_error(&reason)),
            )
                .into_response(),
        }
    }
}

/// Build the shared outbound client.
///
/// Upstreams are commonly deployed with self-signed certificates, so
/// certificate verification is disabled on the outbound leg.
pub fn build_upstream_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()
}

/// POST a JSON body with bearer authentication.
///
/// The returned response may carry any status; callers decide how to treat
/// non-success codes.
pub async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    api_key: &str,
    body: &T,
) -> Result<reqwest::Response, UpstreamError> {
    let mut request = client.post(url).json(body);
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }
    Ok(request.send().await?)
}

/// Logs when the inbound side is dropped before the upstream answered.
struct InFlight<'a> {
    url: &'a str,
    done: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            debug!(upstream = %self.url, "Client went away; upstream call aborted");
        }
    }
}

/// Send a planned call and stream the answer back.
pub async fn dispatch(client: &Client, call: &UpstreamCall) -> Response {
    debug!(upstream = %call.url, role = call.role.as_str(), "Forwarding request");

    let mut guard = InFlight {
        url: &call.url,
        done: false,
    };
    let result = post_json(client, &call.url, &call.api_key, &call.body).await;
    guard.done = true;

    let response = match result {
        Ok(resp) => resp,
        Err(e) => {
            error!(upstream = %call.url, "Upstream request failed: {e}");
            return e.into_response();
        }
    };

    let status = response.status();
    if !status.is_success() {
        return passthrough_error(response).await;
    }

    let byte_stream = response.bytes_stream().map_err(std::io::Error::other);

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(byte_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Return a non-success upstream answer unchanged, logging its body.
async fn passthrough_error(response: reqwest::Response) -> Response {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    let body = response.bytes().await.unwrap_or_default();

    warn!(
        status = status.as_u16(),
        body = %String::from_utf8_lossy(&body),
        "Upstream returned an error"
    );

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
