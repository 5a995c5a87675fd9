//! Rough input-token estimate for the count endpoint.

use serde_json::Value;

use super::normalize::system_prompt;
use super::types::value_to_text;

/// Characters per token assumed by the estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate input tokens as `ceil(len / 4)`, never less than 1, where `len`
/// is measured in UTF-16 code units.
pub fn estimate_input_tokens(body: &Value) -> u64 {
    let mut text = system_prompt(body.get("system"));

    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for message in messages.iter().filter_map(Value::as_object) {
        text.push('\n');
        text.push_str(&flatten_content(message.get("content")));
    }

    // Length in UTF-16 code units, so astral characters count twice.
    let units = text.encode_utf16().count();
    units.div_ceil(CHARS_PER_TOKEN).max(1) as u64
}

fn flatten_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|block| {
                let field = |key: &str| block.get(key).map(value_to_text).unwrap_or_default();
                match block.get("type").and_then(Value::as_str)? {
                    "text" => Some(field("text")),
                    "tool_result" => Some(field("content")),
                    "tool_use" => Some(format!("{} {}", field("name"), field("input"))),
                    "image" => Some("[image]".to_string()),
                    _ => None,
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
