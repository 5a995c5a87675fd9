//! Routing table parsing.
//!
//! A table value may take several shapes:
//!
//! ```json
//! {
//!   "claude-haiku": "gpt-5-mini",
//!   "claude-opus": {"model": "gpt-5", "effort": {"max": "xhigh", "default": "high"}},
//!   "claude-sonnet-4-5": {"openai-codex": "gpt-5", "default": "gpt-5-mini"},
//!   "openai-codex:claude-sonnet-4-5-20250929": "gpt-5.1-codex",
//!   "default": "gpt-5-mini"
//! }
//! ```
//!
//! Each entry is parsed once into a [`RouteSpec`] so the router's precedence
//! chain only ever deals with resolved targets.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::effort::{normalize_target_reasoning, Effort};

/// Key of the catch-all table entry.
pub const DEFAULT_KEY: &str = "default";

/// Object keys that mark a value as a route target rather than a per-provider
/// variant map.
const TARGET_MODEL_KEYS: [&str; 3] = ["model", "target", "to"];

/// How a route adjusts backend reasoning.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningConfig {
    /// Always use this level (empty string disables reasoning).
    Fixed(String),
    /// Pick a level by the request's source effort.
    PerEffort {
        levels: HashMap<Effort, String>,
        default: Option<String>,
    },
}

impl ReasoningConfig {
    /// Parse a `reasoning`/`effort` value. Unusable values yield `None`.
    fn parse(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(s) => normalize_target_reasoning(s).map(ReasoningConfig::Fixed),
            Value::Object(map) => {
                let mut levels = HashMap::new();
                let mut default = None;
                for (key, value) in map {
                    let Some(level) = value.as_str().and_then(normalize_target_reasoning) else {
                        continue;
                    };
                    if key.trim().eq_ignore_ascii_case(DEFAULT_KEY) {
                        default = Some(level);
                    } else if let Some(effort) = Effort::parse(key) {
                        levels.insert(effort, level);
                    }
                }
                if levels.is_empty() && default.is_none() {
                    None
                } else {
                    Some(ReasoningConfig::PerEffort { levels, default })
                }
            }
            _ => None,
        }
    }

    /// The override for a request with the given source effort.
    ///
    /// `Some("")` is an override that disables reasoning; `None` means the
    /// route does not say.
    pub fn resolve(&self, effort: Option<Effort>) -> Option<String> {
        match self {
            ReasoningConfig::Fixed(level) => Some(level.clone()),
            ReasoningConfig::PerEffort { levels, default } => effort
                .and_then(|e| levels.get(&e).cloned())
                .or_else(|| default.clone()),
        }
    }
}

/// A concrete backend model plus optional reasoning policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    pub model_id: String,
    pub reasoning: Option<ReasoningConfig>,
}

impl RouteTarget {
    /// Parse a plain model id string or a target object.
    fn parse(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(s) => {
                let model_id = s.trim();
                (!model_id.is_empty()).then(|| RouteTarget {
                    model_id: model_id.to_string(),
                    reasoning: None,
                })
            }
            Value::Object(map) => {
                let model_id = TARGET_MODEL_KEYS
                    .iter()
                    .filter_map(|key| map.get(*key).and_then(Value::as_str))
                    .map(str::trim)
                    .find(|id| !id.is_empty())?;
                let reasoning = map
                    .get("reasoning")
                    .or_else(|| map.get("effort"))
                    .and_then(ReasoningConfig::parse);
                Some(RouteTarget {
                    model_id: model_id.to_string(),
                    reasoning,
                })
            }
            _ => None,
        }
    }
}

fn is_target_object(map: &Map<String, Value>) -> bool {
    TARGET_MODEL_KEYS
        .iter()
        .any(|key| map.get(*key).is_some_and(Value::is_string))
        || map.contains_key("reasoning")
        || map.contains_key("effort")
}

/// One table value, parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteSpec {
    Target(RouteTarget),
    /// Variants keyed by provider id, with an optional fallback.
    ///
    /// A provider whose variant is unusable resolves to nothing; it does not
    /// fall through to `default`.
    PerProvider {
        variants: HashMap<String, Option<RouteTarget>>,
        default: Option<RouteTarget>,
    },
    Invalid,
}

impl RouteSpec {
    pub fn parse(raw: &Value) -> Self {
        match raw {
            Value::Object(map) if !is_target_object(map) => RouteSpec::PerProvider {
                variants: map
                    .iter()
                    .filter(|(key, _)| key.as_str() != DEFAULT_KEY)
                    .map(|(key, value)| (key.clone(), RouteTarget::parse(value)))
                    .collect(),
                default: map.get(DEFAULT_KEY).and_then(RouteTarget::parse),
            },
            other => RouteTarget::parse(other)
                .map(RouteSpec::Target)
                .unwrap_or(RouteSpec::Invalid),
        }
    }

    /// The target this spec selects for `provider`.
    pub fn resolve(&self, provider: &str) -> Option<&RouteTarget> {
        match self {
            RouteSpec::Target(target) => Some(target),
            RouteSpec::PerProvider { variants, default } => {
                match variants.get(provider).filter(|_| !provider.is_empty()) {
                    Some(variant) => variant.as_ref(),
                    None => default.as_ref(),
                }
            }
            RouteSpec::Invalid => None,
        }
    }
}

/// How a table key matches requested model ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alias {
    /// Applies to every provider.
    Bare(String),
    /// `provider:model`, applies only to that provider.
    Provider { provider: String, model: String },
}

impl Alias {
    /// Classify a table key. The default key and empty keys are not aliases.
    fn parse(key: &str) -> Option<Self> {
        if key.is_empty() || key == DEFAULT_KEY {
            return None;
        }
        Some(split_provider_alias(key).unwrap_or_else(|| Alias::Bare(key.to_string())))
    }
}

/// Split `provider:model`; both halves must be non-empty after trimming.
fn split_provider_alias(key: &str) -> Option<Alias> {
    let (provider, model) = key.trim().split_once(':')?;
    let (provider, model) = (provider.trim(), model.trim());
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some(Alias::Provider {
        provider: provider.to_string(),
        model: model.to_string(),
    })
}

/// One row of the routing table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    pub key: String,
    pub alias: Option<Alias>,
    pub spec: RouteSpec,
}

/// Parsed routing table, in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTable {
    entries: Vec<TableEntry>,
}

impl RoutingTable {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let entries = map
            .iter()
            .map(|(key, value)| TableEntry {
                key: key.clone(),
                alias: Alias::parse(key),
                spec: RouteSpec::parse(value),
            })
            .collect();
        Self { entries }
    }

    /// Parse a JSON value; anything but an object is an empty table.
    pub fn from_value(value: &Value) -> Self {
        value.as_object().map(Self::from_map).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&TableEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
