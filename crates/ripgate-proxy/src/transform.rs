//! Chat and code-completion request rewriting.
//!
//! The pipeline turns an inbound body into either an upstream call plan or a
//! locally rendered short-circuit answer. It performs no I/O, so every rule
//! here is testable without a server.
//!
//! Bodies are treated as opaque JSON documents: only the fields named below
//! are touched and everything else passes through unchanged.

use ripgate_core::{ChatPolicy, GatewayConfig, UpstreamConfig};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::probes::ProbeTable;

/// Fields sent by the impersonated client that real upstreams reject.
const CLIENT_ONLY_FIELDS: &[&str] = &["intent", "intent_threshold", "intent_content", "logprobs"];

/// Every tool/function field removed when tools are disabled.
const TOOL_FIELDS: &[&str] = &["tools", "tool_choice", "functions", "function_call", "tool_call"];

/// Token-limit fields subject to the configured ceiling.
const TOKEN_LIMIT_FIELDS: &[&str] = &["max_tokens", "max_completion_tokens"];

const LOCALE_DIRECTIVE: &str = "Respond in the following locale";

const LEGACY_COMPLETIONS_PATH: &str = "/v1/completions";
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Errors produced while planning a request.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Invalid request body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("No {} upstream is configured", .0.as_str())]
    UpstreamNotConfigured(UpstreamRole),
}

/// Which configured upstream a request is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamRole {
    Chat,
    /// Lightweight chat and code completions.
    Codex,
}

impl UpstreamRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Codex => "codex",
        }
    }
}

/// Request metadata used by probe rules.
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    pub user_agent: String,
}

impl ClientMetadata {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

/// A fully rewritten request ready to send.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub role: UpstreamRole,
    pub url: String,
    pub api_key: String,
    pub body: Value,
}

/// A locally produced event-stream answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortCircuit {
    /// Name of the rule that fired.
    pub rule: String,
    pub body: String,
}

/// Outcome of planning a chat request.
#[derive(Debug, Clone)]
pub enum Plan {
    Upstream(UpstreamCall),
    ShortCircuit(ShortCircuit),
}

/// Rewrites inbound chat and code-completion bodies.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    chat: UpstreamConfig,
    codex: UpstreamConfig,
    policy: ChatPolicy,
    probes: ProbeTable,
}

impl TransformPipeline {
    #[must_use]
    pub fn new(config: &GatewayConfig, probes: ProbeTable) -> Self {
        Self {
            chat: config.chat.clone(),
            codex: config.codex.clone(),
            policy: config.policy.clone(),
            probes,
        }
    }

    /// Plan a chat completion request.
    pub fn plan_chat(&self, body: &[u8], client: &ClientMetadata) -> Result<Plan, TransformError> {
        let mut doc = parse_object(body)?;

        let requested = doc.get("model").and_then(Value::as_str).unwrap_or("");
        let role = self.select_target(requested);
        let upstream = self.upstream(role);
        debug!(requested_model = %requested, upstream = role.as_str(), "Selected chat upstream");

        // Function-call requests keep their last message verbatim.
        let wants_locale = !doc.contains_key("function_call");

        force_model_and_stream(&mut doc, &upstream.model);
        normalize_tools(&mut doc, self.policy.tools_enabled);
        strip_client_fields(&mut doc);
        clamp_limits(&mut doc, self.policy.max_tokens_ceiling);

        let doc = Value::Object(doc);
        if let Some(rule) = self.probes.evaluate(&doc, &client.user_agent) {
            debug!(rule = %rule.name, "Answering probe locally");
            return Ok(Plan::ShortCircuit(ShortCircuit {
                rule: rule.name.clone(),
                body: rule.action.render(),
            }));
        }

        if !upstream.is_configured() {
            return Err(TransformError::UpstreamNotConfigured(role));
        }

        let mut doc = doc;
        if let Some(locale) = self.policy.locale.as_deref().filter(|_| wants_locale) {
            inject_locale(&mut doc, locale);
        }

        let url = match role {
            UpstreamRole::Chat => upstream.base_url.clone(),
            UpstreamRole::Codex => {
                upstream
                    .base_url
                    .replacen(LEGACY_COMPLETIONS_PATH, CHAT_COMPLETIONS_PATH, 1)
            }
        };

        Ok(Plan::Upstream(UpstreamCall {
            role,
            url,
            api_key: upstream.api_key.clone(),
            body: doc,
        }))
    }

    /// Plan a code completion request; always sent to the code upstream.
    pub fn plan_code_completion(&self, body: &[u8]) -> Result<UpstreamCall, TransformError> {
        let mut doc = parse_object(body)?;
        if !self.codex.is_configured() {
            return Err(TransformError::UpstreamNotConfigured(UpstreamRole::Codex));
        }

        force_model_and_stream(&mut doc, &self.codex.model);
        strip_client_fields(&mut doc);
        clamp_limits(&mut doc, self.policy.codex_max_tokens_ceiling);

        Ok(UpstreamCall {
            role: UpstreamRole::Codex,
            url: self.codex.base_url.clone(),
            api_key: self.codex.api_key.clone(),
            body: Value::Object(doc),
        })
    }

    fn select_target(&self, requested_model: &str) -> UpstreamRole {
        let marker = self.policy.lightweight_marker.as_str();
        if !marker.is_empty() && requested_model.contains(marker) {
            UpstreamRole::Codex
        } else {
            UpstreamRole::Chat
        }
    }

    const fn upstream(&self, role: UpstreamRole) -> &UpstreamConfig {
        match role {
            UpstreamRole::Chat => &self.chat,
            UpstreamRole::Codex => &self.codex,
        }
    }
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, TransformError> {
    match serde_json::from_slice(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(TransformError::NotAnObject),
    }
}

fn force_model_and_stream(doc: &mut Map<String, Value>, model: &str) {
    if !model.is_empty() {
        doc.insert("model".to_string(), Value::String(model.to_string()));
    }
    doc.insert("stream".to_string(), Value::Bool(true));
}

fn normalize_tools(doc: &mut Map<String, Value>, tools_enabled: bool) {
    if !doc.contains_key("function_call")
        && let Some(messages) = doc.get_mut("messages").and_then(Value::as_array_mut)
    {
        for message in messages.iter_mut().filter_map(Value::as_object_mut) {
            let empty = match message.get("tool_calls") {
                Some(Value::Array(calls)) => calls.is_empty(),
                Some(Value::Null) => true,
                _ => false,
            };
            if empty {
                message.remove("tool_calls");
            }
        }
    }

    if !tools_enabled {
        for field in TOOL_FIELDS {
            doc.remove(*field);
        }
        return;
    }

    if let Some(tools) = doc.get_mut("tools").and_then(Value::as_array_mut) {
        for function in tools
            .iter_mut()
            .filter_map(|tool| tool.get_mut("function"))
            .filter_map(Value::as_object_mut)
        {
            function
                .entry("parameters")
                .or_insert_with(|| json!({"type": "object", "properties": {}}));
        }
    }
}

fn strip_client_fields(doc: &mut Map<String, Value>) {
    for field in CLIENT_ONLY_FIELDS {
        doc.remove(*field);
    }
}

fn clamp_limits(doc: &mut Map<String, Value>, ceiling: Option<u64>) {
    if let Some(ceiling) = ceiling {
        for field in TOKEN_LIMIT_FIELDS {
            let over = doc
                .get(*field)
                .and_then(integer)
                .is_some_and(|v| u64::try_from(v).is_ok_and(|v| v > ceiling));
            if over {
                doc.insert((*field).to_string(), Value::from(ceiling));
            }
        }
    }

    if doc.get("n").and_then(integer).is_some_and(|n| n > 1) {
        doc.insert("n".to_string(), Value::from(1));
    }
}

/// Integer part of a JSON number; fractional values are truncated.
#[allow(clippy::cast_possible_truncation)]
fn integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|_| i64::MAX))
        .or_else(|| value.as_f64().map(|f| f as i64))
}

/// Append a locale instruction to the last message unless one is present.
fn inject_locale(doc: &mut Value, locale: &str) {
    let Some(last) = doc
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .and_then(|messages| messages.last_mut())
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    let directive = format!("{LOCALE_DIRECTIVE}: {locale}.");
    match last.get_mut("content") {
        Some(Value::String(text)) => {
            if !text.contains(LOCALE_DIRECTIVE) {
                if !text.is_empty() && !text.ends_with(char::is_whitespace) {
                    text.push(' ');
                }
                text.push_str(&directive);
            }
        }
        Some(Value::Array(parts)) => {
            let present = parts.iter().any(|part| {
                part.get("text")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.contains(LOCALE_DIRECTIVE))
            });
            if !present {
                parts.push(json!({"type": "text", "text": directive}));
            }
        }
        None | Some(Value::Null) => {
            last.insert("content".to_string(), Value::String(directive));
        }
        Some(_) => {}
    }
}
