//! Gateway configuration.
//!
//! `GatewayConfig` is built exactly once at startup and handed to each
//! component's constructor. Nothing below the composition root reads the
//! process environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default port for the plaintext listener.
pub const DEFAULT_HTTP_PORT: u16 = 1188;

/// Default port for the TLS listener.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Default embedding dimensionality requested from the upstream.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Model-name marker that routes chat traffic to the lightweight upstream.
pub const DEFAULT_LIGHTWEIGHT_MARKER: &str = "gpt-4o-mini";

/// Default outbound request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default grace period for draining listeners.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was present but could not be parsed.
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// One upstream inference API (chat, code or embedding).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Full endpoint URL requests are posted to.
    pub base_url: String,
    /// Bearer token sent to the upstream.
    pub api_key: String,
    /// Model name substituted into outbound requests.
    pub model: String,
}

impl UpstreamConfig {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// An upstream without an endpoint cannot be dispatched to.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

// Keeps API keys out of logs.
impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("model", &self.model)
            .finish()
    }
}

/// Listener addresses, certificate location and shutdown policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    pub host: String,
    pub http_port: u16,
    pub https_port: u16,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Bounded drain period for both shutdown and certificate reload.
    pub shutdown_grace: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            cert_file: PathBuf::from("ssl/cert.pem"),
            key_file: PathBuf::from("ssl/key.pem"),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ListenConfig {
    /// `host:port` for the plaintext listener.
    #[must_use]
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    /// `host:port` for the TLS listener.
    #[must_use]
    pub fn https_addr(&self) -> String {
        format!("{}:{}", self.host, self.https_port)
    }
}

/// Rewrite policy applied to chat and code-completion bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPolicy {
    /// Requested model names containing this marker go to the lightweight upstream.
    pub lightweight_marker: String,
    /// When false every tool/function field is removed before dispatch.
    pub tools_enabled: bool,
    /// Ceiling for `max_tokens` on chat requests.
    pub max_tokens_ceiling: Option<u64>,
    /// Ceiling for `max_tokens` on code-completion requests.
    pub codex_max_tokens_ceiling: Option<u64>,
    /// Response locale appended as an instruction to the last message.
    pub locale: Option<String>,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            lightweight_marker: DEFAULT_LIGHTWEIGHT_MARKER.to_string(),
            tools_enabled: false,
            max_tokens_ceiling: None,
            codex_max_tokens_ceiling: None,
            locale: None,
        }
    }
}

/// Embedding dimensionality and the chunk budget derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingSettings {
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl EmbeddingSettings {
    /// Chunk byte budget: 1.5x the dimension count.
    #[must_use]
    pub const fn chunk_budget(&self) -> usize {
        self.dimensions * 3 / 2
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub listen: ListenConfig,
    pub chat: UpstreamConfig,
    /// Lightweight / code-completion upstream.
    pub codex: UpstreamConfig,
    pub embedding: UpstreamConfig,
    pub embedding_settings: EmbeddingSettings,
    pub policy: ChatPolicy,
    /// Timeout applied to every outbound upstream call.
    pub request_timeout: Duration,
    /// Optional JSON file overriding the built-in probe rules.
    pub probe_rules_file: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            chat: UpstreamConfig::default(),
            codex: UpstreamConfig::default(),
            embedding: UpstreamConfig::default(),
            embedding_settings: EmbeddingSettings::default(),
            policy: ChatPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_rules_file: None,
        }
    }
}

impl GatewayConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let listen = ListenConfig {
            host: get("HOST").unwrap_or(defaults.listen.host),
            http_port: parse_or(&get, "PORT", defaults.listen.http_port)?,
            https_port: parse_or(&get, "HTTPS_PORT", defaults.listen.https_port)?,
            cert_file: get("CERT_FILE").map_or(defaults.listen.cert_file, PathBuf::from),
            key_file: get("KEY_FILE").map_or(defaults.listen.key_file, PathBuf::from),
            shutdown_grace: Duration::from_secs(parse_or(
                &get,
                "SHUTDOWN_GRACE_SECS",
                defaults.listen.shutdown_grace.as_secs(),
            )?),
        };

        let upstream = |base: &str, key: &str, model: &str| UpstreamConfig {
            base_url: get(base).unwrap_or_default(),
            api_key: get(key).unwrap_or_default(),
            model: get(model).unwrap_or_default(),
        };

        let dimensions: usize = parse_or(
            &get,
            "EMBEDDING_DIMENSION_SIZE",
            DEFAULT_EMBEDDING_DIMENSIONS,
        )?;
        if dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_DIMENSION_SIZE",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let policy = ChatPolicy {
            lightweight_marker: get("LIGHTWEIGHT_MODEL")
                .unwrap_or(defaults.policy.lightweight_marker),
            tools_enabled: match get("CHAT_USE_TOOLS") {
                Some(raw) => parse_bool("CHAT_USE_TOOLS", &raw)?,
                None => false,
            },
            max_tokens_ceiling: parse_optional(&get, "CHAT_MAX_TOKENS")?,
            codex_max_tokens_ceiling: parse_optional(&get, "CODEX_MAX_TOKENS")?,
            locale: get("CHAT_LOCALE"),
        };

        Ok(Self {
            listen,
            chat: upstream("CHAT_API_BASE", "CHAT_API_KEY", "CHAT_API_MODEL_NAME"),
            codex: upstream("CODEX_API_BASE", "CODEX_API_KEY", "CODEX_API_MODEL_NAME"),
            embedding: upstream(
                "EMBEDDING_API_BASE",
                "EMBEDDING_API_KEY",
                "EMBEDDING_API_MODEL_NAME",
            ),
            embedding_settings: EmbeddingSettings { dimensions },
            policy,
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "HTTP_CLIENT_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )?),
            probe_rules_file: get("PROBE_RULES_FILE").map(PathBuf::from),
        })
    }

    #[must_use]
    pub fn with_listen(mut self, listen: ListenConfig) -> Self {
        self.listen = listen;
        self
    }

    #[must_use]
    pub fn with_chat(mut self, chat: UpstreamConfig) -> Self {
        self.chat = chat;
        self
    }

    #[must_use]
    pub fn with_codex(mut self, codex: UpstreamConfig) -> Self {
        self.codex = codex;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: UpstreamConfig) -> Self {
        self.embedding = embedding;
        self
    }

    #[must_use]
    pub const fn with_embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.embedding_settings.dimensions = dimensions;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ChatPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_optional<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key).map(|raw| parse_value(key, &raw)).transpose()
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Accepts the usual spellings: 1/0, t/f, true/false, yes/no (case-insensitive).
fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
