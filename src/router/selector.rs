//! Backend model selection.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::effort::{infer_source_effort, Effort};
use super::table::{Alias, RoutingTable, TableEntry, DEFAULT_KEY};

/// Model used when nothing else names one.
pub const HARD_DEFAULT_MODEL: &str = "gpt-5";

/// The backend model and reasoning chosen for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRoute {
    pub model_id: String,
    pub source_effort: Option<Effort>,
    /// Reasoning level to request. Only meaningful when
    /// `has_reasoning_override` is set; an empty string then disables
    /// reasoning.
    pub reasoning: String,
    pub has_reasoning_override: bool,
    /// Which rule produced this route, e.g. `exact:claude-opus-4-1`.
    pub matched_by: String,
}

impl ModelRoute {
    fn plain(model_id: impl Into<String>, source_effort: Option<Effort>, matched_by: &str) -> Self {
        Self {
            model_id: model_id.into(),
            source_effort,
            reasoning: String::new(),
            has_reasoning_override: false,
            matched_by: matched_by.to_string(),
        }
    }

    /// The reasoning override, if the route carries one.
    pub fn reasoning_override(&self) -> Option<&str> {
        self.has_reasoning_override.then_some(self.reasoning.as_str())
    }
}

/// Guard against forwarding another vendor's model id to a provider.
///
/// When the provider id contains `provider_contains` and the requested model
/// starts with any of `model_prefixes`, the fallback model is used instead
/// and the route is tagged `fallback_family_mismatch_{tag}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyRule {
    pub provider_contains: String,
    pub model_prefixes: Vec<String>,
    pub tag: String,
}

impl FamilyRule {
    pub fn new(provider_contains: &str, model_prefixes: &[&str], tag: &str) -> Self {
        Self {
            provider_contains: provider_contains.to_lowercase(),
            model_prefixes: model_prefixes.iter().map(|p| p.to_string()).collect(),
            tag: tag.to_string(),
        }
    }

    /// Built-in rules: OpenAI-style providers reject `claude-` ids and
    /// Anthropic-style providers reject `gpt`/`o1`/`o3` ids.
    pub fn defaults() -> Vec<Self> {
        vec![
            FamilyRule::new("openai", &["claude-"], "openai"),
            FamilyRule::new("anthropic", &["gpt", "o1", "o3"], "anthropic"),
        ]
    }

    fn matches(&self, provider_lower: &str, requested: &str) -> bool {
        provider_lower.contains(&self.provider_contains.to_lowercase())
            && self
                .model_prefixes
                .iter()
                .any(|prefix| requested.starts_with(prefix.as_str()))
    }
}

/// Resolves requested model ids against a routing table.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    table: RoutingTable,
    provider: String,
    fallback_model: String,
    family_rules: Vec<FamilyRule>,
}

impl ModelRouter {
    /// Create a router for `provider` with the built-in family rules.
    pub fn new(
        table: RoutingTable,
        provider: impl Into<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            table,
            provider: provider.into().trim().to_string(),
            fallback_model: fallback_model.into().trim().to_string(),
            family_rules: FamilyRule::defaults(),
        }
    }

    /// Replace the family-mismatch rules.
    pub fn with_family_rules(mut self, rules: Vec<FamilyRule>) -> Self {
        self.family_rules = rules;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Pick the backend model and reasoning for a request.
    ///
    /// First match wins:
    /// 1. `{provider}:{requested}` key
    /// 2. `{requested}` key
    /// 3. `{provider}:{alias}` key whose alias prefixes the requested id
    /// 4. bare alias key that prefixes the requested id
    /// 5. the `default` key
    /// 6. family-mismatch fallback
    /// 7. the requested id as-is
    /// 8. the fallback model
    /// 9. [`HARD_DEFAULT_MODEL`]
    pub fn resolve(&self, requested_model: Option<&str>, body: &Value) -> ModelRoute {
        let requested = requested_model.map(str::trim).unwrap_or_default();
        let effort = infer_source_effort(body);

        if !requested.is_empty() {
            if let Some(route) = self.resolve_by_table(requested, effort) {
                return route;
            }
        }

        if let Some(route) = self
            .table
            .get(DEFAULT_KEY)
            .and_then(|entry| self.try_entry(entry, effort, "default"))
        {
            return route;
        }

        if !requested.is_empty() {
            if !self.fallback_model.is_empty() {
                let provider_lower = self.provider.to_lowercase();
                if let Some(rule) = self
                    .family_rules
                    .iter()
                    .find(|rule| rule.matches(&provider_lower, requested))
                {
                    tracing::debug!(
                        requested = %requested,
                        provider = %self.provider,
                        fallback = %self.fallback_model,
                        "Requested model belongs to another family, using fallback"
                    );
                    return ModelRoute::plain(
                        &self.fallback_model,
                        effort,
                        &format!("fallback_family_mismatch_{}", rule.tag),
                    );
                }
            }
            return ModelRoute::plain(requested, effort, "passthrough");
        }

        if !self.fallback_model.is_empty() {
            return ModelRoute::plain(&self.fallback_model, effort, "fallback_model");
        }

        ModelRoute::plain(HARD_DEFAULT_MODEL, effort, "hard_default")
    }

    fn resolve_by_table(&self, requested: &str, effort: Option<Effort>) -> Option<ModelRoute> {
        if !self.provider.is_empty() {
            let key = format!("{}:{}", self.provider, requested);
            if let Some(route) = self
                .table
                .get(&key)
                .and_then(|entry| self.try_entry(entry, effort, "exact_provider"))
            {
                return Some(route);
            }
        }

        if let Some(route) = self
            .table
            .get(requested)
            .and_then(|entry| self.try_entry(entry, effort, "exact"))
        {
            return Some(route);
        }

        if !self.provider.is_empty() {
            let by_provider_prefix = self.table.entries().iter().find_map(|entry| {
                match &entry.alias {
                    Some(Alias::Provider { provider, model })
                        if *provider == self.provider && requested.starts_with(model.as_str()) =>
                    {
                        self.try_entry(entry, effort, "prefix_provider")
                    }
                    _ => None,
                }
            });
            if by_provider_prefix.is_some() {
                return by_provider_prefix;
            }
        }

        self.table
            .entries()
            .iter()
            .find_map(|entry| match &entry.alias {
                Some(Alias::Bare(alias)) if requested.starts_with(alias.as_str()) => {
                    self.try_entry(entry, effort, "prefix")
                }
                _ => None,
            })
    }

    fn try_entry(
        &self,
        entry: &TableEntry,
        effort: Option<Effort>,
        rule: &str,
    ) -> Option<ModelRoute> {
        let target = entry.spec.resolve(&self.provider)?;
        let reasoning = target
            .reasoning
            .as_ref()
            .and_then(|config| config.resolve(effort));

        Some(ModelRoute {
            model_id: target.model_id.clone(),
            source_effort: effort,
            has_reasoning_override: reasoning.is_some(),
            reasoning: reasoning.unwrap_or_default(),
            matched_by: format!("{}:{}", rule, entry.key),
        })
    }

    /// Every model id worth advertising: bare aliases, this provider's
    /// prefixed aliases (without the prefix), every target, and the fallback
    /// model. Sorted and deduplicated.
    pub fn catalog(&self) -> Vec<String> {
        let mut models = BTreeSet::new();

        if !self.fallback_model.is_empty() {
            models.insert(self.fallback_model.clone());
        }

        for entry in self.table.entries() {
            match &entry.alias {
                Some(Alias::Bare(alias)) => {
                    models.insert(alias.clone());
                }
                Some(Alias::Provider { provider, model }) if *provider == self.provider => {
                    models.insert(model.clone());
                }
                _ => {}
            }
            if let Some(target) = entry.spec.resolve(&self.provider) {
                models.insert(target.model_id.clone());
            }
        }

        models.into_iter().filter(|m| !m.is_empty()).collect()
    }
}
