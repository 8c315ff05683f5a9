//! Route-level tests driving the router against stubbed upstreams.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use serde_json::{Value, json};
use tower::ServiceExt;

use ripgate_core::{ChatPolicy, GatewayConfig, UpstreamConfig};
use ripgate_proxy::{AppState, ProbeTable, create_router};

fn router(config: &GatewayConfig) -> Router {
    create_router(AppState::from_config(config, ProbeTable::builtin()).unwrap())
}

fn chat_config(server: &MockServer) -> GatewayConfig {
    GatewayConfig::default()
        .with_chat(UpstreamConfig::new(
            server.url("/v1/chat/completions"),
            "sk-chat",
            "upstream-chat",
        ))
        .with_codex(UpstreamConfig::new(
            server.url("/v1/completions"),
            "sk-code",
            "upstream-code",
        ))
        .with_embedding(UpstreamConfig::new(
            server.url("/v1/embeddings"),
            "sk-embed",
            "bge-m3",
        ))
        .with_embedding_dimensions(8)
        .with_policy(ChatPolicy {
            max_tokens_ceiling: Some(1024),
            ..ChatPolicy::default()
        })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn health_endpoint_returns_ok_with_headers() {
    let response = router(&GatewayConfig::default())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::STRICT_TRANSPORT_SECURITY).unwrap(),
        "max-age=0"
    );
    let request_id = response.headers().get("x-github-request-id").unwrap();
    assert_eq!(request_id.to_str().unwrap().len(), 36);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn chat_request_is_rewritten_and_streamed() {
    let server = MockServer::start_async().await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-chat")
                .body_contains("\"n\":1")
                .body_contains("\"max_tokens\":1024")
                .body_contains("\"stream\":true")
                .body_contains("\"model\":\"upstream-chat\"");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(sse);
        })
        .await;

    let response = router(&chat_config(&server))
        .oneshot(post_json(
            "/v1/chat/completions",
            &json!({
                "model": "gpt-4o",
                "n": 3,
                "max_tokens": 4096,
                "intent": true,
                "messages": [{"role": "user", "content": "hello"}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-github-request-id"));
    assert_eq!(body_bytes(response).await, sse.as_bytes());
    mock.assert_async().await;
}

#[tokio::test]
async fn chat_aliases_share_the_handler() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).body("data: [DONE]\n\n");
        })
        .await;

    let app = router(&chat_config(&server));
    for uri in ["/chat/completions", "/agents/chat"] {
        let response = app
            .clone()
            .oneshot(post_json(uri, &json!({"messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn preflight_probe_makes_no_upstream_call() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.any_request();
            then.status(500);
        })
        .await;

    let response = router(&chat_config(&server))
        .oneshot(post_json(
            "/chat/completions",
            &json!({
                "messages": [{
                    "role": "system",
                    "content": "You are a helpful AI programming assistant to a user. Pick a category."
                }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(body_bytes(response).await, b"data: [DONE]\n\n");
    assert_eq!(mock.hits_async().await, 0);
}

#[tokio::test]
async fn lightweight_model_goes_to_code_upstream_chat_path() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-code")
                .body_contains("\"model\":\"upstream-code\"");
            then.status(200).body("data: [DONE]\n\n");
        })
        .await;

    let response = router(&chat_config(&server))
        .oneshot(post_json(
            "/v1/chat/completions",
            &json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "q"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    mock.assert_async().await;
}

#[tokio::test]
async fn code_completion_routes_forward_to_code_upstream() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/completions")
                .header("authorization", "Bearer sk-code")
                .body_contains("\"stream\":true");
            then.status(200).body("data: [DONE]\n\n");
        })
        .await;

    let app = router(&chat_config(&server));
    for uri in [
        "/v1/engines/copilot-codex",
        "/v1/engines/gpt-35-turbo/completions",
    ] {
        let response = app
            .clone()
            .oneshot(post_json(uri, &json!({"prompt": "fn main", "n": 2})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn malformed_and_unconfigured_requests() {
    let app = router(&GatewayConfig::default());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .body(Body::from("{oops"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let response = app
        .clone()
        .oneshot(post_json("/v1/chat/completions", &json!({"messages": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .oneshot(post_json("/embeddings", &json!({"inputs": ["x"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn embeddings_are_rekeyed_and_model_override_applies() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .json_body(json!({"model": "custom-embed", "input": ["a"], "dimensions": 8}));
            then.status(200).json_body(json!({
                "object": "list",
                "model": "custom-embed",
                "data": [{"object": "embedding", "index": 0, "embedding": [0.5]}],
                "usage": {"prompt_tokens": 1, "total_tokens": 1}
            }));
        })
        .await;

    let response = router(&chat_config(&server))
        .oneshot(post_json(
            "/embeddings",
            &json!({"inputs": ["a"], "embedding_model": "custom-embed"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["embedding_model"], "custom-embed");
    assert_eq!(body["embeddings"][0]["embedding"][0], 0.5);
    mock.assert_async().await;
}

#[tokio::test]
async fn chunks_endpoint_splits_and_embeds() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(json!({
                "model": "bge-m3",
                "data": [{"embedding": [1.0, 2.0]}]
            }));
        })
        .await;

    // Budget is 12 bytes with 8 dimensions, so each line below is its own chunk.
    let content = "first line\nsecond line\nthird line\n";
    let response = router(&chat_config(&server))
        .oneshot(post_json(
            "/chunks",
            &json!({"content": content, "path": "notes.md", "embed": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let chunks = body["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(body["embedding_model"], "bge-m3");
    assert!(chunks[0]["text"].as_str().unwrap().starts_with("File: `notes.md`"));
    for chunk in chunks {
        assert_eq!(chunk["embedding"]["embedding"], json!([1.0, 2.0]));
    }
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn chunks_endpoint_validates_input() {
    let app = router(&GatewayConfig::default());

    let response = app
        .clone()
        .oneshot(post_json("/chunks", &json!({"content": "", "path": "a"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Without `embed` no upstream is needed.
    let response = app
        .oneshot(post_json("/chunks", &json!({"content": "x\n", "path": "a"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["chunks"][0]["embedding"]["embedding"], json!([]));
}

#[tokio::test]
async fn chunks_endpoint_rejects_multiline_path() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200)
                .json_body(json!({"model": "bge-m3", "data": [{"embedding": [1.0]}]}));
        })
        .await;
    let app = router(&chat_config(&server));

    for path in ["dir\nfile.rs", "dir\r\nfile.rs"] {
        for embed in [true, false] {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/chunks",
                    &json!({"content": "fn main() {}\n", "path": path, "embed": embed}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "path: {path:?}");
            let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert_eq!(body["error"]["type"], "invalid_request_error");
        }
    }
    mock.assert_hits_async(0).await;
}
