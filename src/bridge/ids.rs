//! Identifier generation and tool-call id sanitization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Longest tool-call id forwarded on either side of the bridge.
pub const MAX_TOOL_CALL_ID_LEN: usize = 64;

/// Source of fresh identifiers.
///
/// Injected wherever the bridge needs to invent an id so tests can swap in a
/// deterministic implementation.
pub trait IdGenerator: Send + Sync {
    /// A new tool-call id, already in sanitized form (`tool_...`).
    fn tool_call_id(&self) -> String;

    /// A new wire message id (`msg_...`).
    fn message_id(&self) -> String;
}

/// Random ids backed by UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn tool_call_id(&self) -> String {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        format!("tool_{}", &uuid[..8])
    }

    fn message_id(&self) -> String {
        format!("msg_{}", uuid::Uuid::new_v4().simple())
    }
}

/// Counter-based ids: `tool_1`, `tool_2`, ... and `msg_1`, `msg_2`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl IdGenerator for SequentialIds {
    fn tool_call_id(&self) -> String {
        format!("tool_{}", self.bump())
    }

    fn message_id(&self) -> String {
        format!("msg_{}", self.bump())
    }
}

/// Reduce a tool-call id to `[A-Za-z0-9_-]{1,64}`.
///
/// Surrounding whitespace is trimmed and any other character is dropped.
/// When nothing survives, a fresh id is drawn from `ids`.
pub fn sanitize_tool_call_id(raw: &str, ids: &dyn IdGenerator) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_TOOL_CALL_ID_LEN)
        .collect();

    if cleaned.is_empty() {
        ids.tool_call_id()
    } else {
        cleaned
    }
}
