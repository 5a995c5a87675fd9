//! Backend-neutral conversation and completion types.
//!
//! These are what the normalizer produces for a runner and what a runner
//! hands back (either as one [`Completion`] or a sequence of
//! [`BackendEvent`]s). Field names on the wire follow the backend's
//! camelCase convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One piece of content inside a conversation turn or completion.
///
/// Order within a turn is significant and preserved end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "thinking", alias = "reasoning")]
    Thinking {
        #[serde(alias = "text")]
        thinking: String,
    },

    #[serde(rename = "toolCall")]
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },

    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Whether a client would see anything for this block.
    pub fn is_visible(&self) -> bool {
        match self {
            ContentBlock::Text { text } => !text.is_empty(),
            ContentBlock::Thinking { thinking } => !thinking.is_empty(),
            ContentBlock::ToolCall { name, .. } => !name.is_empty(),
            ContentBlock::Image { .. } => false,
        }
    }
}

/// User content is either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single turn of the normalized conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum ConversationTurn {
    #[serde(rename = "user")]
    User { content: UserContent },

    #[serde(rename = "assistant")]
    Assistant { content: Vec<ContentBlock> },

    #[serde(rename = "toolResult", rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<ContentBlock>,
        is_error: bool,
    },
}

/// A tool declaration offered to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The backend-neutral form of one inbound request.
///
/// Built once per request by [`crate::bridge::normalize_request`] and never
/// mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub system_prompt: String,
    pub turns: Vec<ConversationTurn>,
    pub tools: Vec<ToolSpec>,
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    #[default]
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl StopReason {
    /// Terminal states that indicate the backend failed rather than finished.
    pub fn is_failure(self) -> bool {
        matches!(self, StopReason::Error | StopReason::Aborted)
    }
}

/// Token accounting reported by the backend. Missing fields are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// One finished backend completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Completion {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Completion {
    pub fn has_visible_content(&self) -> bool {
        self.content.iter().any(ContentBlock::is_visible)
    }

    /// The error message, trimmed, if it carries any text.
    pub fn error_text(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// Whatever the backend knows about a tool call at a given point of a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One event of a streamed backend call.
///
/// `content_index` is the source index: the position of the block inside the
/// message the backend is assembling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendEvent {
    #[serde(rename = "start")]
    Start,

    #[serde(rename = "thinking_start", rename_all = "camelCase")]
    ThinkingStart {
        #[serde(default)]
        content_index: usize,
    },

    #[serde(rename = "thinking_delta", rename_all = "camelCase")]
    ThinkingDelta {
        #[serde(default)]
        content_index: usize,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "thinking_end", rename_all = "camelCase")]
    ThinkingEnd {
        #[serde(default)]
        content_index: usize,
    },

    #[serde(rename = "text_start", rename_all = "camelCase")]
    TextStart {
        #[serde(default)]
        content_index: usize,
    },

    #[serde(rename = "text_delta", rename_all = "camelCase")]
    TextDelta {
        #[serde(default)]
        content_index: usize,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "text_end", rename_all = "camelCase")]
    TextEnd {
        #[serde(default)]
        content_index: usize,
    },

    #[serde(rename = "toolcall_start", rename_all = "camelCase")]
    ToolCallStart {
        #[serde(default)]
        content_index: usize,
        #[serde(default)]
        tool_call: Option<ToolCallInfo>,
        /// Snapshot of the message so far; some backends only report the
        /// tool call's name and id here.
        #[serde(default)]
        partial: Option<Completion>,
    },

    #[serde(rename = "toolcall_delta", rename_all = "camelCase")]
    ToolCallDelta {
        #[serde(default)]
        content_index: usize,
        #[serde(default)]
        delta: String,
        #[serde(default)]
        tool_call: Option<ToolCallInfo>,
        #[serde(default)]
        partial: Option<Completion>,
    },

    #[serde(rename = "toolcall_end", rename_all = "camelCase")]
    ToolCallEnd {
        #[serde(default)]
        content_index: usize,
        #[serde(default)]
        tool_call: Option<ToolCallInfo>,
    },

    #[serde(rename = "done")]
    Done {
        #[serde(default)]
        reason: Option<StopReason>,
        #[serde(default)]
        message: Completion,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        reason: Option<StopReason>,
        #[serde(default)]
        error: Completion,
    },
}

impl BackendEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendEvent::Start => "start",
            BackendEvent::ThinkingStart { .. } => "thinking_start",
            BackendEvent::ThinkingDelta { .. } => "thinking_delta",
            BackendEvent::ThinkingEnd { .. } => "thinking_end",
            BackendEvent::TextStart { .. } => "text_start",
            BackendEvent::TextDelta { .. } => "text_delta",
            BackendEvent::TextEnd { .. } => "text_end",
            BackendEvent::ToolCallStart { .. } => "toolcall_start",
            BackendEvent::ToolCallDelta { .. } => "toolcall_delta",
            BackendEvent::ToolCallEnd { .. } => "toolcall_end",
            BackendEvent::Done { .. } => "done",
            BackendEvent::Error { .. } => "error",
        }
    }
}

/// Render an arbitrary JSON value as text: strings as-is, null as empty,
/// everything else as compact JSON.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_defaults_missing_fields() {
        let completion: Completion = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "hi"}],
            "usage": {"input": 3}
        }))
        .unwrap();

        assert_eq!(completion.stop_reason, StopReason::Stop);
        assert_eq!(completion.usage.input, 3);
        assert_eq!(completion.usage.output, 0);
        assert_eq!(completion.usage.cache_write, 0);
        assert!(completion.error_message.is_none());
    }

    #[test]
    fn test_unknown_stop_reason_parses_as_unknown() {
        let reason: StopReason = serde_json::from_value(json!("sleepy")).unwrap();
        assert_eq!(reason, StopReason::Unknown);
    }

    #[test]
    fn test_reasoning_block_reads_as_thinking() {
        let block: ContentBlock =
            serde_json::from_value(json!({"type": "reasoning", "text": "hmm"})).unwrap();
        assert_eq!(
            block,
            ContentBlock::Thinking {
                thinking: "hmm".to_string()
            }
        );
    }

    #[test]
    fn test_backend_event_parses_camel_case_fields() {
        let event: BackendEvent = serde_json::from_value(json!({
            "type": "toolcall_end",
            "contentIndex": 2,
            "toolCall": {"id": "call_1", "name": "Bash", "arguments": {"command": "ls"}}
        }))
        .unwrap();

        match event {
            BackendEvent::ToolCallEnd {
                content_index,
                tool_call: Some(call),
            } => {
                assert_eq!(content_index, 2);
                assert_eq!(call.name, "Bash");
                assert_eq!(call.arguments["command"], "ls");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_turn_serializes_camel_case() {
        let turn = ConversationTurn::ToolResult {
            tool_call_id: "call_1".to_string(),
            tool_name: "Bash".to_string(),
            content: vec![ContentBlock::text("ok")],
            is_error: false,
        };
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "toolResult");
        assert_eq!(value["toolCallId"], "call_1");
        assert_eq!(value["isError"], false);
    }

    #[test]
    fn test_value_to_text_renders_non_strings_as_json() {
        assert_eq!(value_to_text(&json!("plain")), "plain");
        assert_eq!(value_to_text(&Value::Null), "");
        assert_eq!(value_to_text(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
