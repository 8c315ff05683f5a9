//! Probe and client-compatibility rules.
//!
//! Some clients send preflight requests whose answers they never show, or
//! require a specific first turn before they will talk to a backend. These
//! are recognised by structural signature and answered locally.
//!
//! Rules are evaluated in table order and the first match wins. Predicates
//! can overlap, so order is part of the contract.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{ChatChunkChoice, ChatCompletionChunk, ChatDelta};

/// Terminal server-sent-event frame.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const PREFLIGHT_PREAMBLE: &str = "You are a helpful AI programming assistant to a user";
const PREFLIGHT_CATEGORY_MARKER: &str = "If you cannot choose just one category, or if none of the categories seem like they would provide the user with a better result, you must always respond with";
const VS_CLIENT_AGENT: &str = "VSCopilotClient";
const VS_FIRST_TURN_PREAMBLE: &str = "You are an AI programming assistant";
const VS_FOLLOW_UP_PROMPT: &str = "Write a short one-sentence question that I can ask that naturally follows from the previous few questions and answers. It should not ask a question which is already answered in the conversation. It should be a question that you are capable of answering. Reply with only the text of the question and nothing else.";

/// Conditions a request must satisfy for a rule to fire. Every set field must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCondition {
    pub user_agent_contains: Option<String>,
    pub first_role_contains: Option<String>,
    pub first_content_contains: Option<String>,
    /// First message content must contain none of these.
    pub first_content_excludes: Vec<String>,
    pub last_role_equals: Option<String>,
    pub last_content_equals: Option<String>,
    /// Top-level request fields that must be absent.
    pub absent_fields: Vec<String>,
}

impl ProbeCondition {
    fn matches(&self, body: &Value, user_agent: &str) -> bool {
        if fails(self.user_agent_contains.as_deref(), |n| user_agent.contains(n)) {
            return false;
        }

        if self.absent_fields.iter().any(|f| body.get(f).is_some()) {
            return false;
        }

        let messages = body
            .get("messages")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice);
        let first = messages.first();
        let last = messages.last();

        let first_role = first.map_or("", |m| message_str(m, "role"));
        let first_content = first.map_or("", |m| message_str(m, "content"));

        if fails(self.first_role_contains.as_deref(), |n| first_role.contains(n))
            || fails(self.first_content_contains.as_deref(), |n| {
                first_content.contains(n)
            })
        {
            return false;
        }
        if self
            .first_content_excludes
            .iter()
            .any(|marker| first_content.contains(marker.as_str()))
        {
            return false;
        }

        let last_role = last.map_or("", |m| message_str(m, "role"));
        let last_content = last.map_or("", |m| message_str(m, "content"));

        !fails(self.last_role_equals.as_deref(), |r| last_role == r)
            && !fails(self.last_content_equals.as_deref(), |c| last_content == c)
    }
}

/// True when a predicate is set and does not hold.
fn fails(expected: Option<&str>, holds: impl FnOnce(&str) -> bool) -> bool {
    expected.is_some_and(|e| !holds(e))
}

fn message_str<'a>(message: &'a Value, field: &str) -> &'a str {
    message.get(field).and_then(Value::as_str).unwrap_or("")
}

/// What to answer when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeAction {
    /// Reply with the terminal stream marker only.
    Done,
    /// Reply with a short simulated assistant turn.
    Canned {
        model: String,
        /// Content of each delta frame; the last frame carries `finish_reason: "stop"`.
        deltas: Vec<String>,
    },
}

impl ProbeAction {
    /// Render the full server-sent-event body for this action.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Done => DONE_FRAME.to_string(),
            Self::Canned { model, deltas } => {
                let created = chrono::Utc::now().timestamp();
                let mut out = String::new();
                for (i, content) in deltas.iter().enumerate() {
                    let finish = (i + 1 == deltas.len()).then(|| "stop".to_string());
                    let frame = ChatCompletionChunk {
                        id: Uuid::new_v4().to_string(),
                        object: "chat.completion.chunk".to_string(),
                        model: model.clone(),
                        created,
                        choices: vec![ChatChunkChoice {
                            index: 0,
                            delta: ChatDelta {
                                role: "assistant".to_string(),
                                content: content.clone(),
                            },
                            finish_reason: finish,
                        }],
                    };
                    // A struct of strings and integers always serializes.
                    if let Ok(json) = serde_json::to_string(&frame) {
                        out.push_str("data: ");
                        out.push_str(&json);
                        out.push_str("\n\n");
                    }
                }
                out.push_str(DONE_FRAME);
                out
            }
        }
    }
}

/// A named (condition, action) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRule {
    pub name: String,
    pub when: ProbeCondition,
    pub action: ProbeAction,
}

/// Ordered rule table; first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTable {
    pub rules: Vec<ProbeRule>,
}

impl ProbeTable {
    /// Rules for the known client preflight and handshake requests.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                ProbeRule {
                    name: "chat-preflight".to_string(),
                    when: ProbeCondition {
                        first_role_contains: Some("system".to_string()),
                        first_content_contains: Some(PREFLIGHT_PREAMBLE.to_string()),
                        first_content_excludes: vec![PREFLIGHT_CATEGORY_MARKER.to_string()],
                        absent_fields: vec!["tool_choice".to_string()],
                        ..ProbeCondition::default()
                    },
                    action: ProbeAction::Done,
                },
                ProbeRule {
                    name: "vs-first-turn".to_string(),
                    when: ProbeCondition {
                        user_agent_contains: Some(VS_CLIENT_AGENT.to_string()),
                        first_role_contains: Some("system".to_string()),
                        first_content_contains: Some(VS_FIRST_TURN_PREAMBLE.to_string()),
                        ..ProbeCondition::default()
                    },
                    action: ProbeAction::Canned {
                        model: "gpt-4o-mini-2024-07-18".to_string(),
                        deltas: ["", "", "Explain", "", ""]
                            .into_iter()
                            .map(String::from)
                            .collect(),
                    },
                },
                ProbeRule {
                    name: "vs-follow-up-question".to_string(),
                    when: ProbeCondition {
                        user_agent_contains: Some(VS_CLIENT_AGENT.to_string()),
                        last_role_equals: Some("user".to_string()),
                        last_content_equals: Some(VS_FOLLOW_UP_PROMPT.to_string()),
                        ..ProbeCondition::default()
                    },
                    action: ProbeAction::Done,
                },
            ],
        }
    }

    /// Load a rule table from a JSON file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read probe rules from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid probe rules in {}", path.display()))
    }

    /// Built-in rules, or the file's rules when a path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        path.map_or_else(|| Ok(Self::builtin()), Self::from_json_file)
    }

    /// First rule matching `body`, if any.
    #[must_use]
    pub fn evaluate(&self, body: &Value, user_agent: &str) -> Option<&ProbeRule> {
        self.rules
            .iter()
            .find(|rule| rule.when.matches(body, user_agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn preflight_body() -> Value {
        json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": format!("{PREFLIGHT_PREAMBLE}. Classify the question.")},
                {"role": "user", "content": "hi"}
            ]
        })
    }

    #[test]
    fn test_preflight_matches_without_tool_choice() {
        let table = ProbeTable::builtin();
        let rule = table.evaluate(&preflight_body(), "vscode/1.96").unwrap();
        assert_eq!(rule.name, "chat-preflight");
        assert_eq!(rule.action, ProbeAction::Done);
    }

    #[test]
    fn test_preflight_skipped_with_tool_choice_or_marker() {
        let table = ProbeTable::builtin();

        let mut with_choice = preflight_body();
        with_choice["tool_choice"] = json!("auto");
        assert!(table.evaluate(&with_choice, "vscode").is_none());

        let long = json!({
            "messages": [{
                "role": "system",
                "content": format!("{PREFLIGHT_PREAMBLE} ... {PREFLIGHT_CATEGORY_MARKER} none"),
            }]
        });
        assert!(table.evaluate(&long, "vscode").is_none());
    }

    #[test]
    fn test_vs_rules_require_user_agent() {
        let table = ProbeTable::builtin();
        let first_turn = json!({
            "messages": [
                {"role": "system", "content": "You are an AI programming assistant."},
                {"role": "user", "content": "hello"}
            ]
        });
        assert!(table.evaluate(&first_turn, "vscode").is_none());
        let rule = table.evaluate(&first_turn, "VSCopilotClient/17.12").unwrap();
        assert_eq!(rule.name, "vs-first-turn");

        let follow_up = json!({
            "messages": [
                {"role": "assistant", "content": "previous answer"},
                {"role": "user", "content": VS_FOLLOW_UP_PROMPT}
            ]
        });
        let rule = table.evaluate(&follow_up, "VSCopilotClient").unwrap();
        assert_eq!(rule.name, "vs-follow-up-question");
    }

    #[test]
    fn test_first_match_wins() {
        // Both preflight and vs-first-turn preambles match; table order decides.
        let body = json!({
            "messages": [{
                "role": "system",
                "content": format!("{PREFLIGHT_PREAMBLE}. {VS_FIRST_TURN_PREAMBLE}"),
            }]
        });
        let table = ProbeTable::builtin();
        assert_eq!(
            table.evaluate(&body, "VSCopilotClient").unwrap().name,
            "chat-preflight"
        );
    }

    #[test]
    fn test_no_messages_never_panics() {
        let table = ProbeTable::builtin();
        assert!(table.evaluate(&json!({}), "VSCopilotClient").is_none());
        assert!(table.evaluate(&json!({"messages": "oops"}), "").is_none());
    }

    #[test]
    fn test_canned_render_frames() {
        let action = ProbeAction::Canned {
            model: "m".to_string(),
            deltas: vec!["".to_string(), "Explain".to_string()],
        };
        let body = action.render();
        let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], "data: [DONE]");

        let last: Value = serde_json::from_str(frames[1].trim_start_matches("data: ")).unwrap();
        assert_eq!(last["choices"][0]["delta"]["content"], "Explain");
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        let first: Value = serde_json::from_str(frames[0].trim_start_matches("data: ")).unwrap();
        assert!(first["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn test_rules_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"rules":[{"name":"ping","when":{"last_content_equals":"ping"},"action":{"kind":"done"}}]}"#,
        )
        .unwrap();

        let table = ProbeTable::load(Some(&path)).unwrap();
        assert_eq!(table.rules.len(), 1);
        let body = json!({"messages":[{"role":"user","content":"ping"}]});
        assert_eq!(table.evaluate(&body, "").unwrap().name, "ping");

        assert_eq!(ProbeTable::load(None).unwrap(), ProbeTable::builtin());
        assert!(ProbeTable::load(Some(&dir.path().join("missing.json"))).is_err());
    }
}
