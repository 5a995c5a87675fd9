//! Configuration parsing and validation for msgbridge.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::Path;

use crate::router::{FamilyRule, ModelRouter, RoutingTable};

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    /// Routing table, in file order.
    pub model_map: Map<String, Value>,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8787")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum accepted request body, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How the upstream API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Upstream backend configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Provider id used for routing (e.g., "openai-codex")
    pub provider: String,
    /// Platform id, used when `provider` is empty
    pub platform: String,
    /// Base URL of the OpenAI-compatible API (e.g., "https://api.openai.com/v1")
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Fallback model when routing finds nothing better
    pub default_model: String,
    /// Whether to derive backend reasoning from the request's effort
    pub reasoning: bool,
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    /// The provider id the router matches against.
    pub fn provider_id(&self) -> &str {
        let provider = self.provider.trim();
        if provider.is_empty() {
            self.platform.trim()
        } else {
            provider
        }
    }
}

fn default_provider() -> String {
    "openai-codex".to_string()
}

fn default_model() -> String {
    "gpt-5.1-codex-mini".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

/// Routing behaviour beyond the model map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    /// Replaces the built-in family-mismatch rules when present.
    #[serde(default)]
    pub family_rules: Option<Vec<FamilyRule>>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw upstream config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Debug, Deserialize)]
pub struct RawUpstreamConfig {
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    url: String,
    api_key: Option<String>,
    #[serde(default = "default_model")]
    default_model: String,
    #[serde(default = "default_true")]
    reasoning: bool,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

impl Default for RawUpstreamConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            platform: String::new(),
            url: String::new(),
            api_key: None,
            default_model: default_model(),
            reasoning: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Raw configuration deserialized directly from TOML.
/// The upstream api_key may contain `${VAR}` references not yet expanded.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    upstream: RawUpstreamConfig,
    #[serde(default)]
    model_map: Map<String, Value>,
    #[serde(default)]
    routing: RoutingConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, provider_name: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced by upstream '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Derive the convention-based env var name for a provider.
///
/// Transforms provider name to `MSGBRIDGE_<UPPER_SNAKE_NAME>_API_KEY`:
/// - "openai" -> "MSGBRIDGE_OPENAI_API_KEY"
/// - "openai-codex" -> "MSGBRIDGE_OPENAI_CODEX_API_KEY"
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' ', '.'], "_");
    format!("MSGBRIDGE_{}_API_KEY", upper_snake)
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR}` references
    /// from the process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string using the process environment.
    pub fn parse_str(content: &str) -> Result<(Self, KeySource), ConfigError> {
        Self::parse_str_with(content, |name| std::env::var(name).ok())
    }

    /// Parse configuration from a TOML string with a custom env lookup.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content)?;
        let (config, source) = Self::from_raw(raw, lookup)?;
        config.validate()?;
        Ok((config, source))
    }

    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// - If `api_key` contains `${VAR}`: expand, source = `EnvExpanded`
    /// - If `api_key` is a literal string: wrap directly, source = `Literal`
    /// - If `api_key` is absent: try `MSGBRIDGE_<PROVIDER>_API_KEY`,
    ///   source = `Convention(var_name)` or `KeySource::None`
    pub fn from_raw<F>(raw: RawConfig, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ru = raw.upstream;
        let provider = ru.provider.trim().to_string();
        let platform = ru.platform.trim().to_string();
        let key_owner = if provider.is_empty() { &platform } else { &provider };

        let (api_key, source) = match ru.api_key {
            Some(ref raw_key) if raw_key.contains("${") => {
                let expanded = expand_env_vars_with(raw_key, key_owner, &lookup)?;
                (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
            }
            Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
            None => {
                let var_name = convention_env_var_name(key_owner);
                match lookup(&var_name) {
                    Some(value) => (Some(ApiKey::from(value)), KeySource::Convention(var_name)),
                    None => (None, KeySource::None),
                }
            }
        };

        let upstream = UpstreamConfig {
            provider,
            platform,
            url: ru.url.trim().to_string(),
            api_key,
            default_model: ru.default_model.trim().to_string(),
            reasoning: ru.reasoning,
            timeout_secs: ru.timeout_secs,
        };

        let config = Config {
            server: raw.server,
            upstream,
            model_map: raw.model_map,
            routing: raw.routing,
            logging: raw.logging,
        };

        Ok((config, source))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.is_empty() {
            return Err(ConfigError::Validation(
                "upstream.url must not be empty".to_string(),
            ));
        }

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_body_bytes must be positive".to_string(),
            ));
        }

        if self.model_map.keys().any(|key| key.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "model_map keys must not be empty".to_string(),
            ));
        }

        if self.model_map.is_empty() {
            tracing::warn!("No model_map configured - requested models pass through unchanged");
        }

        Ok(())
    }

    /// Build the model router described by this configuration.
    pub fn model_router(&self) -> ModelRouter {
        let router = ModelRouter::new(
            RoutingTable::from_map(&self.model_map),
            self.upstream.provider_id(),
            self.upstream.default_model.as_str(),
        );
        match &self.routing.family_rules {
            Some(rules) => router.with_family_rules(rules.clone()),
            None => router,
        }
    }
}
