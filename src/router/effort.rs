//! Reasoning-effort inference and normalization.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Normalized reasoning intensity requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    None,
    Low,
    Medium,
    High,
    Max,
}

impl Effort {
    /// Parse a client-supplied effort name. Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "none" | "off" | "disabled" | "disable" | "false" | "0" => Some(Effort::None),
            "low" | "minimal" => Some(Effort::Low),
            "medium" => Some(Effort::Medium),
            "high" => Some(Effort::High),
            "max" | "xhigh" | "maximum" => Some(Effort::Max),
            _ => None,
        }
    }

    /// Bucket an extended-thinking token budget.
    pub fn from_budget(budget: f64) -> Self {
        if budget <= 0.0 {
            Effort::None
        } else if budget <= 2048.0 {
            Effort::Low
        } else if budget <= 8192.0 {
            Effort::Medium
        } else if budget <= 24576.0 {
            Effort::High
        } else {
            Effort::Max
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Effort::None => "none",
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
            Effort::Max => "max",
        }
    }
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work out the effort a request body asks for.
///
/// Explicit fields win in order: `effort`, `metadata.effort`,
/// `metadata.reasoning_effort`, `thinking.effort`, `reasoning.effort`.
/// Otherwise the `thinking.budget_tokens` budget is bucketed.
pub fn infer_source_effort(body: &Value) -> Option<Effort> {
    const CANDIDATES: [&str; 5] = [
        "/effort",
        "/metadata/effort",
        "/metadata/reasoning_effort",
        "/thinking/effort",
        "/reasoning/effort",
    ];

    CANDIDATES
        .iter()
        .filter_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .find_map(Effort::parse)
        .or_else(|| effort_from_budget(body))
}

fn effort_from_budget(body: &Value) -> Option<Effort> {
    let thinking = body.get("thinking")?.as_object()?;
    let budget = thinking
        .get("budget_tokens")
        .filter(|v| !v.is_null())
        .or_else(|| thinking.get("budgetTokens"))?;

    // Blank strings, null and false count as a zero budget.
    let budget = match budget {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    budget.is_finite().then(|| Effort::from_budget(budget))
}

/// Normalize a backend reasoning level from a routing table.
///
/// Returns `Some("")` for an explicit disable (`none`, `off`, ...),
/// `Some(level)` for a known level (`max` becomes `xhigh`), and `None` for
/// anything unrecognized.
pub fn normalize_target_reasoning(raw: &str) -> Option<String> {
    let value = raw.trim().to_lowercase();
    match value.as_str() {
        "" => None,
        "none" | "off" | "disabled" | "disable" | "false" | "0" => Some(String::new()),
        "max" => Some("xhigh".to_string()),
        "minimal" | "low" | "medium" | "high" | "xhigh" => Some(value),
        _ => None,
    }
}
