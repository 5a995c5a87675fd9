//! Outbound response synthesis.
//!
//! Turns one backend [`Completion`] into one Messages-protocol response, and
//! holds the helpers the stream translator shares with it (signatures,
//! tool-argument normalization, stop-reason and usage mapping).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::ids::{sanitize_tool_call_id, IdGenerator};
use super::types::{Completion, ContentBlock, StopReason, Usage};

/// Prompt used for a `Task` call that carries nothing more specific.
pub const GENERIC_TASK_PROMPT: &str = "Continue with the current task.";

/// Model name reported when neither a requested nor a resolved id is known.
const UNKNOWN_MODEL: &str = "unknown-model";

/// A content block of an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

/// Token usage in Messages-protocol form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

impl From<&Usage> for WireUsage {
    fn from(usage: &Usage) -> Self {
        Self {
            input_tokens: usage.input,
            output_tokens: usage.output,
            cache_read_input_tokens: usage.cache_read,
            cache_creation_input_tokens: usage.cache_write,
        }
    }
}

/// A complete non-streamed response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub model: String,
    pub content: Vec<WireBlock>,
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
    pub usage: WireUsage,
}

/// Per-response knobs for [`synthesize_response`].
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    /// Model id the client asked for; echoed back when present.
    pub requested_model: Option<String>,
    /// Backend model id the router picked.
    pub resolved_model: String,
    /// Drop all thinking content from the output.
    pub suppress_thinking: bool,
    /// Use this message id instead of drawing a fresh one.
    pub message_id: Option<String>,
}

impl SynthesisOptions {
    /// The model name shown to the client.
    pub fn display_model(&self) -> &str {
        self.requested_model
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(Some(self.resolved_model.as_str()).filter(|m| !m.is_empty()))
            .unwrap_or(UNKNOWN_MODEL)
    }
}

/// Deterministic signature for a thinking block.
///
/// CRLF line endings are folded to LF before hashing so the same rendered
/// text always signs the same.
pub fn thinking_signature(thinking: &str) -> String {
    let normalized = thinking.replace("\r\n", "\n");
    let digest = Sha256::digest(normalized.as_bytes());
    format!("synthetic.{}", STANDARD.encode(digest))
}

/// Map a backend stop reason to its wire name.
pub fn map_stop_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::ToolUse => "tool_use",
        StopReason::Length => "max_tokens",
        StopReason::Stop | StopReason::Aborted | StopReason::Error | StopReason::Unknown => {
            "end_turn"
        }
    }
}

/// Tool arguments as an object, with a `Task` call always carrying a
/// non-blank `prompt`.
///
/// For `Task` the prompt is taken, in order, from a non-blank `prompt`, a
/// non-blank `description`, `"Continue task {resume}"`, or
/// [`GENERIC_TASK_PROMPT`].
pub fn normalize_tool_arguments(name: &str, arguments: &Value) -> Value {
    let mut args = match arguments {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if name != "Task" {
        return Value::Object(args);
    }

    let trimmed = |key: &str| -> Option<String> {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let prompt = trimmed("prompt")
        .or_else(|| trimmed("description"))
        .or_else(|| trimmed("resume").map(|id| format!("Continue task {}", id)))
        .unwrap_or_else(|| GENERIC_TASK_PROMPT.to_string());

    args.insert("prompt".to_string(), Value::String(prompt));
    Value::Object(args)
}

/// Build the outbound message for one completion.
pub fn synthesize_response(
    completion: &Completion,
    options: &SynthesisOptions,
    ids: &dyn IdGenerator,
) -> WireMessage {
    let mut content = Vec::with_capacity(completion.content.len());

    for block in &completion.content {
        match block {
            ContentBlock::Thinking { thinking } => {
                if options.suppress_thinking || thinking.is_empty() {
                    continue;
                }
                content.push(WireBlock::Thinking {
                    thinking: thinking.clone(),
                    signature: thinking_signature(thinking),
                });
            }
            ContentBlock::Text { text } => content.push(WireBlock::Text { text: text.clone() }),
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => {
                let name = if name.is_empty() { "tool" } else { name.as_str() };
                content.push(WireBlock::ToolUse {
                    id: sanitize_tool_call_id(id, ids),
                    name: name.to_string(),
                    input: normalize_tool_arguments(name, arguments),
                });
            }
            ContentBlock::Image { .. } => {}
        }
    }

    // Keep upstream failures visible instead of returning an empty turn.
    if content.is_empty() && !options.suppress_thinking {
        if let Some(message) = completion.error_text() {
            content.push(WireBlock::Thinking {
                thinking: message.to_string(),
                signature: thinking_signature(message),
            });
        }
    }

    WireMessage {
        id: options
            .message_id
            .clone()
            .unwrap_or_else(|| ids.message_id()),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: options.display_model().to_string(),
        content,
        stop_reason: map_stop_reason(completion.stop_reason).to_string(),
        stop_sequence: None,
        usage: WireUsage::from(&completion.usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ids::SequentialIds;
    use serde_json::json;

    fn options() -> SynthesisOptions {
        SynthesisOptions {
            requested_model: Some("claude-sonnet-4-5".to_string()),
            resolved_model: "gpt-5".to_string(),
            suppress_thinking: false,
            message_id: Some("msg_test".to_string()),
        }
    }

    #[test]
    fn test_signature_ignores_line_ending_style() {
        assert_eq!(
            thinking_signature("step one\nstep two\n"),
            thinking_signature("step one\r\nstep two\r\n")
        );
        assert_ne!(thinking_signature("a"), thinking_signature("b"));
        assert!(thinking_signature("a").starts_with("synthetic."));
    }

    #[test]
    fn test_signature_is_base64_sha256() {
        // sha256("") base64-encoded
        assert_eq!(
            thinking_signature(""),
            "synthetic.47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(map_stop_reason(StopReason::ToolUse), "tool_use");
        assert_eq!(map_stop_reason(StopReason::Length), "max_tokens");
        assert_eq!(map_stop_reason(StopReason::Stop), "end_turn");
        assert_eq!(map_stop_reason(StopReason::Aborted), "end_turn");
        assert_eq!(map_stop_reason(StopReason::Error), "end_turn");
        assert_eq!(map_stop_reason(StopReason::Unknown), "end_turn");
    }

    #[test]
    fn test_task_prompt_backfill_order() {
        let keep = normalize_tool_arguments("Task", &json!({"prompt": "  do it  "}));
        assert_eq!(keep["prompt"], "do it");

        let described = normalize_tool_arguments(
            "Task",
            &json!({"prompt": " ", "description": "Continue project analysis", "resume": "a8a2fb7"}),
        );
        assert_eq!(described["prompt"], "Continue project analysis");

        let resumed = normalize_tool_arguments("Task", &json!({"resume": "a8a2fb7"}));
        assert_eq!(resumed["prompt"], "Continue task a8a2fb7");
        assert_eq!(resumed["resume"], "a8a2fb7");

        let generic = normalize_tool_arguments("Task", &json!(null));
        assert_eq!(generic, json!({"prompt": GENERIC_TASK_PROMPT}));
    }

    #[test]
    fn test_other_tools_are_left_alone() {
        assert_eq!(
            normalize_tool_arguments("Bash", &json!({"command": "ls"})),
            json!({"command": "ls"})
        );
        assert_eq!(normalize_tool_arguments("Bash", &json!("raw")), json!({}));
    }

    #[test]
    fn test_maps_all_block_kinds() {
        let completion: Completion = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "consider"},
                {"type": "text", "text": "answer"},
                {"type": "toolCall", "id": "call.1", "name": "Task", "arguments": {"resume": "a8a2fb7"}}
            ],
            "stopReason": "toolUse",
            "usage": {"input": 10, "output": 5, "cacheRead": 2}
        }))
        .unwrap();

        let message = synthesize_response(&completion, &options(), &SequentialIds::new());

        assert_eq!(message.id, "msg_test");
        assert_eq!(message.kind, "message");
        assert_eq!(message.model, "claude-sonnet-4-5");
        assert_eq!(message.stop_reason, "tool_use");
        assert_eq!(message.usage.input_tokens, 10);
        assert_eq!(message.usage.cache_read_input_tokens, 2);
        assert_eq!(message.usage.cache_creation_input_tokens, 0);
        assert_eq!(message.content.len(), 3);
        assert_eq!(
            message.content[0],
            WireBlock::Thinking {
                thinking: "consider".to_string(),
                signature: thinking_signature("consider"),
            }
        );
        match &message.content[2] {
            WireBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call1");
                assert_eq!(name, "Task");
                assert_eq!(input["prompt"], "Continue task a8a2fb7");
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
    }

    #[test]
    fn test_suppress_thinking_drops_thinking() {
        let completion = Completion {
            content: vec![
                ContentBlock::Thinking {
                    thinking: "secret".to_string(),
                },
                ContentBlock::text("visible"),
            ],
            ..Completion::default()
        };
        let opts = SynthesisOptions {
            suppress_thinking: true,
            ..options()
        };
        let message = synthesize_response(&completion, &opts, &SequentialIds::new());
        assert_eq!(
            message.content,
            vec![WireBlock::Text {
                text: "visible".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_error_completion_surfaces_message() {
        let completion = Completion {
            stop_reason: StopReason::Error,
            error_message: Some("X".to_string()),
            ..Completion::default()
        };

        let shown = synthesize_response(&completion, &options(), &SequentialIds::new());
        assert_eq!(
            shown.content,
            vec![WireBlock::Thinking {
                thinking: "X".to_string(),
                signature: thinking_signature("X"),
            }]
        );
        assert_eq!(shown.stop_reason, "end_turn");

        let hidden = synthesize_response(
            &completion,
            &SynthesisOptions {
                suppress_thinking: true,
                ..options()
            },
            &SequentialIds::new(),
        );
        assert!(hidden.content.is_empty());
    }

    #[test]
    fn test_blank_error_message_is_not_surfaced() {
        let completion = Completion {
            stop_reason: StopReason::Error,
            error_message: Some("   ".to_string()),
            ..Completion::default()
        };
        let message = synthesize_response(&completion, &options(), &SequentialIds::new());
        assert!(message.content.is_empty());
    }

    #[test]
    fn test_serializes_null_stop_sequence_and_falls_back_to_resolved_model() {
        let opts = SynthesisOptions {
            requested_model: None,
            message_id: None,
            ..options()
        };
        let message = synthesize_response(&Completion::default(), &opts, &SequentialIds::new());
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["model"], "gpt-5");
        assert_eq!(value["id"], "msg_1");
        assert!(value["stop_sequence"].is_null());
        assert_eq!(value["usage"]["output_tokens"], 0);
    }
}
