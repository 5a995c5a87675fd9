//! Integration tests for model routing driven by a TOML configuration.
//!
//! Verifies that:
//! - A `[model_map]` table in TOML drives the router end to end
//! - Per-provider variants, effort maps and prefix aliases resolve as configured
//! - Family-mismatch fallback applies with the built-in and configured rules
//! - The model catalog lists aliases, targets and the fallback model
//! - Configuration loads from a file on disk

use std::io::Write;

use serde_json::json;

use msgbridge::config::{Config, KeySource};
use msgbridge::router::{Effort, ModelRouter};

const CONFIG: &str = r#"
[server]
listen = "127.0.0.1:0"

[upstream]
provider = "openai-codex"
url = "https://api.example.com/v1"
api_key = "sk-test"
default_model = "codex-mini-latest"

[model_map]
"claude-sonnet-4-5" = { "openai-codex" = "gpt-5", default = "gpt-5-mini" }
"openai-codex:claude-opus" = { model = "gpt-5.1-codex", effort = { max = "xhigh", high = "high", default = "medium" } }
"claude-haiku" = { model = "gpt-5-nano", reasoning = "none" }
"anthropic:claude-3" = "should-not-match"
"#;

fn router_from(config: &str) -> ModelRouter {
    let (config, _) = Config::parse_str_with(config, |_| None).expect("valid config");
    config.model_router()
}

#[test]
fn test_per_provider_variant_resolves_for_active_provider() {
    let router = router_from(CONFIG);
    let route = router.resolve(Some("claude-sonnet-4-5"), &json!({}));

    assert_eq!(route.model_id, "gpt-5");
    assert_eq!(route.matched_by, "exact:claude-sonnet-4-5");
    assert!(!route.has_reasoning_override);
}

#[test]
fn test_per_provider_variant_uses_default_for_other_provider() {
    let config = CONFIG.replace(r#"provider = "openai-codex""#, r#"provider = "azure-codex""#);
    let router = router_from(&config);
    let route = router.resolve(Some("claude-sonnet-4-5"), &json!({}));

    assert_eq!(route.model_id, "gpt-5-mini");
}

#[test]
fn test_provider_prefix_alias_with_effort_map() {
    let router = router_from(CONFIG);

    let route = router.resolve(Some("claude-opus-4-1-20250805"), &json!({"effort": "max"}));
    assert_eq!(route.model_id, "gpt-5.1-codex");
    assert_eq!(route.matched_by, "prefix_provider:openai-codex:claude-opus");
    assert_eq!(route.source_effort, Some(Effort::Max));
    assert!(route.has_reasoning_override);
    assert_eq!(route.reasoning, "xhigh");

    let route = router.resolve(
        Some("claude-opus-4-1"),
        &json!({"thinking": {"type": "enabled", "budget_tokens": 16000}}),
    );
    assert_eq!(route.source_effort, Some(Effort::High));
    assert_eq!(route.reasoning_override(), Some("high"));

    let route = router.resolve(Some("claude-opus-4-1"), &json!({}));
    assert_eq!(route.source_effort, None);
    assert_eq!(route.reasoning_override(), Some("medium"));
}

#[test]
fn test_disabling_reasoning_is_a_present_override() {
    let router = router_from(CONFIG);
    let route = router.resolve(Some("claude-haiku-4-5"), &json!({}));

    assert_eq!(route.model_id, "gpt-5-nano");
    assert_eq!(route.matched_by, "prefix:claude-haiku");
    assert!(route.has_reasoning_override);
    assert_eq!(route.reasoning, "");
    assert_eq!(route.reasoning_override(), Some(""));
}

#[test]
fn test_other_provider_alias_is_ignored() {
    let router = router_from(CONFIG);
    let route = router.resolve(Some("claude-3-7-sonnet"), &json!({}));

    assert_eq!(route.model_id, "codex-mini-latest");
    assert!(route.matched_by.starts_with("fallback_family_mismatch"));
}

#[test]
fn test_empty_table_family_mismatch_uses_fallback() {
    let router = router_from(
        r#"
        [upstream]
        provider = "openai-codex"
        url = "https://api.example.com/v1"
        default_model = "codex-mini-latest"
        "#,
    );
    let route = router.resolve(Some("claude-sonnet-4-5-20250929"), &json!({}));

    assert_eq!(route.model_id, "codex-mini-latest");
    assert_eq!(route.matched_by, "fallback_family_mismatch_openai");

    let route = router.resolve(Some("gpt-4.1"), &json!({}));
    assert_eq!(route.model_id, "gpt-4.1");
    assert_eq!(route.matched_by, "passthrough");

    let route = router.resolve(None, &json!({}));
    assert_eq!(route.model_id, "codex-mini-latest");
    assert_eq!(route.matched_by, "fallback_model");
}

#[test]
fn test_configured_family_rules_replace_builtins() {
    let router = router_from(
        r#"
        [upstream]
        provider = "openai-codex"
        url = "https://api.example.com/v1"
        default_model = "codex-mini-latest"

        [[routing.family_rules]]
        provider_contains = "codex"
        model_prefixes = ["gemini-"]
        tag = "google"
        "#,
    );

    let route = router.resolve(Some("gemini-2.5-pro"), &json!({}));
    assert_eq!(route.model_id, "codex-mini-latest");
    assert_eq!(route.matched_by, "fallback_family_mismatch_google");

    let route = router.resolve(Some("claude-sonnet-4-5"), &json!({}));
    assert_eq!(route.model_id, "claude-sonnet-4-5");
    assert_eq!(route.matched_by, "passthrough");
}

#[test]
fn test_default_entry_catches_everything() {
    let router = router_from(
        r#"
        [upstream]
        url = "https://api.example.com/v1"

        [model_map]
        default = { model = "gpt-5", reasoning = "low" }
        "#,
    );

    for requested in [Some("claude-opus-4-1"), Some("anything"), None] {
        let route = router.resolve(requested, &json!({}));
        assert_eq!(route.model_id, "gpt-5");
        assert_eq!(route.matched_by, "default:default");
        assert_eq!(route.reasoning_override(), Some("low"));
    }
}

#[test]
fn test_catalog_from_config() {
    let router = router_from(CONFIG);

    assert_eq!(
        router.catalog(),
        vec![
            "claude-haiku",
            "claude-opus",
            "claude-sonnet-4-5",
            "codex-mini-latest",
            "gpt-5",
            "gpt-5-nano",
            "gpt-5.1-codex",
            "should-not-match",
        ]
    );
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(CONFIG.as_bytes()).expect("write config");

    let (config, source) = Config::from_file(file.path()).expect("load config");

    assert_eq!(source, KeySource::Literal);
    assert_eq!(config.server.listen, "127.0.0.1:0");
    assert_eq!(config.upstream.provider_id(), "openai-codex");
    assert_eq!(config.model_map.len(), 4);
    assert_eq!(
        config.model_map.keys().next().map(String::as_str),
        Some("claude-sonnet-4-5")
    );
}

#[test]
fn test_missing_config_file_is_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = Config::from_file(dir.path().join("missing.toml")).unwrap_err();

    assert!(err.to_string().contains("missing.toml"));
}
