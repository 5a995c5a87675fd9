//! OpenAI-compatible chat-completions wire types.
//!
//! Request types only carry the fields this gateway sends. Response types are
//! lenient: every field is optional so partial stream chunks and providers
//! that omit fields both deserialize.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::bridge::{ContentBlock, Conversation, ConversationTurn, ToolSpec, UserContent};

use super::RunOptions;

/// Outbound `/chat/completions` request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    /// Only sent on streaming requests so the final chunk carries usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: UserMessageContent,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ChatToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum UserMessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub parameters: Value,
}

impl ChatCompletionRequest {
    /// Build a request for `model` from a normalized conversation.
    pub fn from_conversation(
        model: &str,
        conversation: &Conversation,
        options: &RunOptions,
        stream: bool,
    ) -> Self {
        let mut messages = Vec::with_capacity(conversation.turns.len() + 1);
        if !conversation.system_prompt.is_empty() {
            messages.push(ChatMessage::System {
                content: conversation.system_prompt.clone(),
            });
        }
        messages.extend(conversation.turns.iter().filter_map(chat_message));

        Self {
            model: model.to_string(),
            messages,
            tools: conversation.tools.iter().map(chat_tool).collect(),
            max_completion_tokens: options.max_tokens,
            temperature: options.temperature,
            reasoning_effort: options.reasoning.clone(),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

fn chat_message(turn: &ConversationTurn) -> Option<ChatMessage> {
    match turn {
        ConversationTurn::User { content } => {
            let content = match content {
                UserContent::Text(text) => UserMessageContent::Text(text.clone()),
                UserContent::Blocks(blocks) => {
                    let parts: Vec<ContentPart> = blocks.iter().filter_map(content_part).collect();
                    if parts.is_empty() {
                        return None;
                    }
                    UserMessageContent::Parts(parts)
                }
            };
            Some(ChatMessage::User { content })
        }
        ConversationTurn::Assistant { content } => {
            let text: String = content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            let tool_calls: Vec<ChatToolCall> = content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(ChatToolCall {
                        id: id.clone(),
                        kind: "function",
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: encode_arguments(arguments),
                        },
                    }),
                    _ => None,
                })
                .collect();
            if text.is_empty() && tool_calls.is_empty() {
                return None;
            }
            Some(ChatMessage::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls,
            })
        }
        ConversationTurn::ToolResult {
            tool_call_id,
            content,
            ..
        } => {
            let text = content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(ChatMessage::Tool {
                tool_call_id: tool_call_id.clone(),
                content: text,
            })
        }
    }
}

fn content_part(block: &ContentBlock) -> Option<ContentPart> {
    match block {
        ContentBlock::Text { text } => Some(ContentPart::Text { text: text.clone() }),
        ContentBlock::Image { data, mime_type } => Some(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", mime_type, data),
            },
        }),
        _ => None,
    }
}

fn chat_tool(tool: &ToolSpec) -> ChatTool {
    ChatTool {
        kind: "function",
        function: FunctionDef {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// A `/chat/completions` response body or one streamed chunk of it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatCompletionChunk {
    pub choices: Option<Vec<Choice>>,
    pub usage: Option<ChatUsage>,
    pub error: Option<Value>,
}

impl ChatCompletionChunk {
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.as_ref().and_then(|choices| choices.first())
    }

    /// Message of an embedded `error` object or string.
    pub fn error_message(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        let message = match error {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
            Value::Null => return None,
            other => other.to_string(),
        };
        Some(message)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Choice {
    /// Full message (non-streaming).
    pub message: Option<ChoiceMessage>,
    /// Incremental message (streaming).
    pub delta: Option<ChoiceMessage>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChoiceMessage {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    /// Some providers name the reasoning channel `reasoning`.
    pub reasoning: Option<String>,
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

impl ChoiceMessage {
    pub fn reasoning_text(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .or(self.reasoning.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn content_text(&self) -> Option<&str> {
        self.content.as_deref().filter(|s| !s.is_empty())
    }

    pub fn tool_calls(&self) -> &[ToolCallFragment] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolCallFragment {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub function: Option<FunctionFragment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionFragment {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatUsage {
    #[serde(deserialize_with = "null_as_zero")]
    pub prompt_tokens: u64,
    #[serde(deserialize_with = "null_as_zero")]
    pub completion_tokens: u64,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PromptTokensDetails {
    #[serde(deserialize_with = "null_as_zero")]
    pub cached_tokens: u64,
}

/// Token counts some providers send as `null`.
fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}
