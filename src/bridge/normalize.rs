//! Inbound request normalization.
//!
//! Converts a Messages-protocol request body into a [`Conversation`]. The
//! conversion is best effort: unknown block types, malformed entries and
//! unsupported image encodings are skipped rather than rejected.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::ids::{sanitize_tool_call_id, IdGenerator};
use super::types::{
    value_to_text, ContentBlock, Conversation, ConversationTurn, ToolSpec, UserContent,
};

/// Tool name used for results whose call id was never seen.
const UNKNOWN_TOOL_NAME: &str = "tool";

/// Build the backend-neutral conversation for one request body.
pub fn normalize_request(body: &Value, ids: &dyn IdGenerator) -> Conversation {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut turns = Vec::new();
    let mut tool_names: HashMap<String, String> = HashMap::new();

    for message in messages {
        let Some(message) = message.as_object() else {
            continue;
        };
        let Some(role) = message.get("role").and_then(Value::as_str) else {
            continue;
        };
        let content = message.get("content").unwrap_or(&Value::Null);

        match role {
            "assistant" => {
                if let Some(turn) = assistant_turn(content, &mut tool_names, ids) {
                    turns.push(turn);
                }
            }
            "user" => user_turns(content, &tool_names, ids, &mut turns),
            _ => {}
        }
    }

    Conversation {
        system_prompt: system_prompt(body.get("system")),
        turns,
        tools: tool_specs(body.get("tools")),
    }
}

/// The `system` field as one string: a string as-is, text items of an array
/// joined by newlines, anything else empty.
pub fn system_prompt(system: Option<&Value>) -> String {
    match system {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .map(|item| item.get("text").map(value_to_text).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Tool declarations with a usable name.
pub fn tool_specs(tools: Option<&Value>) -> Vec<ToolSpec> {
    let Some(tools) = tools.and_then(Value::as_array) else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|tool| {
            let name = tool.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let parameters = match tool.get("input_schema") {
                Some(schema @ Value::Object(_)) => schema.clone(),
                _ => json!({"type": "object", "properties": {}}),
            };
            Some(ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            })
        })
        .collect()
}

/// Object blocks of an array content. Non-array content has none.
fn content_blocks(content: &Value) -> Vec<&Map<String, Value>> {
    match content {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

fn block_type(block: &Map<String, Value>) -> &str {
    block.get("type").and_then(Value::as_str).unwrap_or_default()
}

fn field_text(block: &Map<String, Value>, key: &str) -> String {
    block.get(key).map(value_to_text).unwrap_or_default()
}

fn assistant_turn(
    content: &Value,
    tool_names: &mut HashMap<String, String>,
    ids: &dyn IdGenerator,
) -> Option<ConversationTurn> {
    let mut blocks = Vec::new();

    if let Value::String(text) = content {
        blocks.push(ContentBlock::text(text.clone()));
    }

    for block in content_blocks(content) {
        match block_type(block) {
            "thinking" => {
                let thinking = field_text(block, "thinking");
                if !thinking.is_empty() {
                    blocks.push(ContentBlock::Thinking { thinking });
                }
            }
            "text" => blocks.push(ContentBlock::text(field_text(block, "text"))),
            "tool_use" => {
                let id = sanitize_tool_call_id(&field_text(block, "id"), ids);
                let name = match field_text(block, "name") {
                    n if n.is_empty() => UNKNOWN_TOOL_NAME.to_string(),
                    n => n,
                };
                let arguments = match block.get("input") {
                    Some(input @ Value::Object(_)) => input.clone(),
                    _ => json!({}),
                };
                tool_names.insert(id.clone(), name.clone());
                blocks.push(ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    if blocks.is_empty() {
        None
    } else {
        Some(ConversationTurn::Assistant { content: blocks })
    }
}

fn user_turns(
    content: &Value,
    tool_names: &HashMap<String, String>,
    ids: &dyn IdGenerator,
    turns: &mut Vec<ConversationTurn>,
) {
    if let Value::String(text) = content {
        turns.push(ConversationTurn::User {
            content: UserContent::Text(text.clone()),
        });
        return;
    }

    let mut pending: Vec<ContentBlock> = Vec::new();

    for block in content_blocks(content) {
        if block_type(block) == "tool_result" {
            flush_user_blocks(&mut pending, turns);

            let raw_id = ["tool_use_id", "toolUseId", "tool_call_id"]
                .iter()
                .map(|key| field_text(block, key))
                .find(|id| !id.is_empty())
                .unwrap_or_default();
            let tool_call_id = sanitize_tool_call_id(&raw_id, ids);
            let tool_name = tool_names
                .get(&tool_call_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string());

            turns.push(ConversationTurn::ToolResult {
                tool_call_id,
                tool_name,
                content: tool_result_content(block.get("content")),
                is_error: block.get("is_error").and_then(Value::as_bool) == Some(true),
            });
            continue;
        }

        if let Some(converted) = user_block(block) {
            pending.push(converted);
        }
    }

    flush_user_blocks(&mut pending, turns);
}

/// Emit buffered user blocks as one turn. A lone text block collapses to a
/// plain string.
fn flush_user_blocks(pending: &mut Vec<ContentBlock>, turns: &mut Vec<ConversationTurn>) {
    if pending.is_empty() {
        return;
    }

    let blocks = std::mem::take(pending);
    let content = match blocks.as_slice() {
        [ContentBlock::Text { text }] => UserContent::Text(text.clone()),
        _ => UserContent::Blocks(blocks),
    };
    turns.push(ConversationTurn::User { content });
}

fn user_block(block: &Map<String, Value>) -> Option<ContentBlock> {
    match block_type(block) {
        "text" => Some(ContentBlock::text(field_text(block, "text"))),
        "image" => image_block(block),
        _ => None,
    }
}

/// Only base64 image sources are forwarded.
fn image_block(block: &Map<String, Value>) -> Option<ContentBlock> {
    let source = block.get("source")?.as_object()?;
    if source.get("type").and_then(Value::as_str) != Some("base64") {
        return None;
    }
    let data = source.get("data").and_then(Value::as_str).unwrap_or_default();
    if data.is_empty() {
        return None;
    }
    let mime_type = source
        .get("media_type")
        .and_then(Value::as_str)
        .unwrap_or("image/png");

    Some(ContentBlock::Image {
        data: data.to_string(),
        mime_type: mime_type.to_string(),
    })
}

fn tool_result_content(content: Option<&Value>) -> Vec<ContentBlock> {
    let converted = match content {
        Some(Value::String(text)) => vec![ContentBlock::text(text.clone())],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(user_block)
            .collect(),
        _ => Vec::new(),
    };

    if converted.is_empty() {
        vec![ContentBlock::text("")]
    } else {
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ids::SequentialIds;

    fn normalize(body: Value) -> Conversation {
        normalize_request(&body, &SequentialIds::new())
    }

    #[test]
    fn test_system_string_and_array() {
        assert_eq!(system_prompt(Some(&json!("be brief"))), "be brief");
        assert_eq!(
            system_prompt(Some(&json!([
                {"type": "text", "text": "one"},
                {"type": "image"},
                {"type": "text", "text": "two"}
            ]))),
            "one\ntwo"
        );
        assert_eq!(system_prompt(Some(&json!(42))), "");
        assert_eq!(system_prompt(None), "");
    }

    #[test]
    fn test_tools_without_names_are_dropped() {
        let tools = tool_specs(Some(&json!([
            {"name": "  Bash ", "description": "run", "input_schema": {"type": "object", "properties": {"command": {"type": "string"}}}},
            {"name": "   "},
            {"description": "nameless"},
            {"name": "Read"}
        ])));

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "Bash");
        assert_eq!(tools[0].parameters["properties"]["command"]["type"], "string");
        assert_eq!(tools[1].name, "Read");
        assert_eq!(tools[1].description, "");
        assert_eq!(
            tools[1].parameters,
            json!({"type": "object", "properties": {}})
        );
    }

    #[test]
    fn test_user_string_passes_through() {
        let conversation = normalize(json!({
            "messages": [{"role": "user", "content": "hello"}]
        }));
        assert_eq!(
            conversation.turns,
            vec![ConversationTurn::User {
                content: UserContent::Text("hello".to_string())
            }]
        );
    }

    #[test]
    fn test_assistant_drops_empty_thinking_and_records_tool_names() {
        let conversation = normalize(json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": ""},
                    {"type": "thinking", "thinking": "plan"},
                    {"type": "text", "text": "running"},
                    {"type": "tool_use", "id": "toolu_01", "name": "Bash", "input": {"command": "ls"}},
                    {"type": "server_tool_use", "id": "x"}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_01", "content": "a.txt"}
                ]}
            ]
        }));

        assert_eq!(conversation.turns.len(), 2);
        match &conversation.turns[0] {
            ConversationTurn::Assistant { content } => {
                assert_eq!(content.len(), 3);
                assert_eq!(
                    content[0],
                    ContentBlock::Thinking {
                        thinking: "plan".to_string()
                    }
                );
                assert!(matches!(&content[2], ContentBlock::ToolCall { name, .. } if name == "Bash"));
            }
            other => panic!("expected assistant turn, got {:?}", other),
        }
        match &conversation.turns[1] {
            ConversationTurn::ToolResult {
                tool_call_id,
                tool_name,
                content,
                is_error,
            } => {
                assert_eq!(tool_call_id, "toolu_01");
                assert_eq!(tool_name, "Bash");
                assert_eq!(content, &vec![ContentBlock::text("a.txt")]);
                assert!(!is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_assistant_turn_is_omitted() {
        let conversation = normalize(json!({
            "messages": [
                {"role": "assistant", "content": [{"type": "thinking", "thinking": ""}]},
                {"role": "assistant", "content": []}
            ]
        }));
        assert!(conversation.turns.is_empty());
    }

    #[test]
    fn test_tool_result_flushes_buffered_blocks() {
        let conversation = normalize(json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "before"},
                {"type": "tool_result", "tool_use_id": "call 9", "is_error": true, "content": [
                    {"type": "text", "text": "boom"}
                ]},
                {"type": "text", "text": "after"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "AAAA"}}
            ]}]
        }));

        assert_eq!(conversation.turns.len(), 3);
        assert_eq!(
            conversation.turns[0],
            ConversationTurn::User {
                content: UserContent::Text("before".to_string())
            }
        );
        match &conversation.turns[1] {
            ConversationTurn::ToolResult {
                tool_call_id,
                tool_name,
                is_error,
                ..
            } => {
                assert_eq!(tool_call_id, "call9");
                assert_eq!(tool_name, "tool");
                assert!(is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
        assert_eq!(
            conversation.turns[2],
            ConversationTurn::User {
                content: UserContent::Blocks(vec![
                    ContentBlock::text("after"),
                    ContentBlock::Image {
                        data: "AAAA".to_string(),
                        mime_type: "image/jpeg".to_string()
                    }
                ])
            }
        );
    }

    #[test]
    fn test_url_images_are_dropped() {
        let conversation = normalize(json!({
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}
            ]}]
        }));
        assert!(conversation.turns.is_empty());
    }

    #[test]
    fn test_odd_tool_result_content_degrades_to_empty_text() {
        for content in [json!(null), json!({"weird": true}), json!([{"type": "document"}])] {
            let conversation = normalize(json!({
                "messages": [{"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "c1", "content": content}
                ]}]
            }));
            match &conversation.turns[0] {
                ConversationTurn::ToolResult { content, .. } => {
                    assert_eq!(content, &vec![ContentBlock::text("")]);
                }
                other => panic!("expected tool result, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_tool_use_id_gets_synthesized() {
        let conversation = normalize(json!({
            "messages": [{"role": "user", "content": [{"type": "tool_result", "content": "x"}]}]
        }));
        match &conversation.turns[0] {
            ConversationTurn::ToolResult { tool_call_id, .. } => {
                assert_eq!(tool_call_id, "tool_1");
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_roles_and_malformed_messages_are_skipped() {
        let conversation = normalize(json!({
            "messages": ["nope", {"content": "no role"}, {"role": "system", "content": "x"}]
        }));
        assert!(conversation.turns.is_empty());
    }
}
