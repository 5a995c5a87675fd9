//! Streaming translation from backend events to Messages-protocol SSE.
//!
//! [`StreamTranslator`] consumes [`BackendEvent`]s for one call in arrival
//! order and produces the [`SseRecord`]s to write to the client. Output block
//! indices are handed out by a [`BlockTable`]:
//!
//! - a `(channel, source index)` key maps to the same output index for as
//!   long as its block is open;
//! - once closed, an index is never handed out again, so a later block on the
//!   same key gets a fresh one;
//! - a `content_block_stop` is only ever written for an index whose
//!   `content_block_start` was written first.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use super::ids::{sanitize_tool_call_id, IdGenerator};
use super::synthesize::{
    map_stop_reason, normalize_tool_arguments, thinking_signature, WireUsage,
};
use super::types::{BackendEvent, Completion, ContentBlock, StopReason, ToolCallInfo};

/// Error message used when a stream error carries none.
const DEFAULT_STREAM_ERROR: &str = "Upstream stream error";

/// One server-sent event: `event: <name>\ndata: <json>\n\n`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SseRecord {
    pub event: &'static str,
    pub data: Value,
}

impl SseRecord {
    fn new(event: &'static str, data: Value) -> Self {
        Self { event, data }
    }

    /// Wire framing for this record.
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Logical kind of a source content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Text,
    Thinking,
    Tool,
}

/// Allocation key: which source block an output index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub channel: Channel,
    pub source_index: usize,
}

impl BlockKey {
    pub fn new(channel: Channel, source_index: usize) -> Self {
        Self {
            channel,
            source_index,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ToolMeta {
    id: String,
    name: String,
}

/// Output block index bookkeeping for one stream.
///
/// `index_by_key` and `key_by_index` link keys and indices while a block is
/// live; `open` holds the indices whose `content_block_start` has been
/// written. Indices are allocated from a counter that only moves forward.
#[derive(Debug, Default)]
pub struct BlockTable {
    next_index: usize,
    index_by_key: HashMap<BlockKey, usize>,
    key_by_index: HashMap<usize, BlockKey>,
    open: BTreeSet<usize>,
    thinking_text: HashMap<usize, String>,
    tool_meta: HashMap<usize, ToolMeta>,
    pending_text: HashSet<usize>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index bound to `key`, allocating a fresh one if none is live.
    pub fn allocate(&mut self, key: BlockKey) -> usize {
        if let Some(&index) = self.index_by_key.get(&key) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.index_by_key.insert(key, index);
        self.key_by_index.insert(index, key);
        index
    }

    /// The live index bound to `key`, if any.
    pub fn find(&self, key: BlockKey) -> Option<usize> {
        self.index_by_key.get(&key).copied()
    }

    /// Unbind `index` from its key. The index is retired for good.
    pub fn release(&mut self, index: usize) {
        if let Some(key) = self.key_by_index.remove(&index) {
            if self.index_by_key.get(&key) == Some(&index) {
                self.index_by_key.remove(&key);
            }
        }
        self.open.remove(&index);
        self.thinking_text.remove(&index);
        self.tool_meta.remove(&index);
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.open.contains(&index)
    }

    /// Mark `index` open. Returns true if it was not open before.
    fn open(&mut self, index: usize) -> bool {
        self.open.insert(index)
    }

    /// Indices currently open on the wire, in allocation order.
    pub fn open_indices(&self) -> Vec<usize> {
        self.open.iter().copied().collect()
    }

    fn clear(&mut self) {
        self.index_by_key.clear();
        self.key_by_index.clear();
        self.open.clear();
        self.thinking_text.clear();
        self.tool_meta.clear();
        self.pending_text.clear();
    }
}

/// Per-stream translator from backend events to SSE records.
///
/// Not shareable across streams; create one per call.
pub struct StreamTranslator {
    model: String,
    message_id: String,
    suppress_thinking: bool,
    message_started: bool,
    blocks: BlockTable,
    ids: Arc<dyn IdGenerator>,
}

impl StreamTranslator {
    pub fn new(
        model: impl Into<String>,
        suppress_thinking: bool,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let message_id = ids.message_id();
        Self::with_message_id(model, message_id, suppress_thinking, ids)
    }

    pub fn with_message_id(
        model: impl Into<String>,
        message_id: impl Into<String>,
        suppress_thinking: bool,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            model: model.into(),
            message_id: message_id.into(),
            suppress_thinking,
            message_started: false,
            blocks: BlockTable::new(),
            ids,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Output indices still open.
    pub fn open_indices(&self) -> Vec<usize> {
        self.blocks.open_indices()
    }

    /// Translate one backend event into zero or more SSE records.
    pub fn translate(&mut self, event: &BackendEvent) -> Vec<SseRecord> {
        let mut out = Vec::new();

        match event {
            BackendEvent::ThinkingStart { .. }
            | BackendEvent::ThinkingDelta { .. }
            | BackendEvent::ThinkingEnd { .. }
                if self.suppress_thinking => {}

            BackendEvent::Start => self.ensure_message_start(&mut out),

            BackendEvent::ThinkingStart { content_index } => {
                self.ensure_message_start(&mut out);
                self.open_thinking(*content_index, &mut out);
            }

            BackendEvent::ThinkingDelta {
                content_index,
                delta,
            } => {
                self.ensure_message_start(&mut out);
                let index = self.open_thinking(*content_index, &mut out);
                self.blocks
                    .thinking_text
                    .entry(index)
                    .or_default()
                    .push_str(delta);
                out.push(block_delta(
                    index,
                    json!({"type": "thinking_delta", "thinking": delta}),
                ));
            }

            BackendEvent::ThinkingEnd { content_index } => {
                self.ensure_message_start(&mut out);
                self.end_thinking(*content_index, &mut out);
            }

            BackendEvent::TextStart { content_index } => {
                self.blocks.pending_text.insert(*content_index);
            }

            BackendEvent::TextDelta {
                content_index,
                delta,
            } => {
                self.ensure_message_start(&mut out);
                let index = self
                    .blocks
                    .allocate(BlockKey::new(Channel::Text, *content_index));
                self.blocks.pending_text.remove(content_index);
                if self.blocks.open(index) {
                    out.push(block_start(index, json!({"type": "text", "text": ""})));
                }
                out.push(block_delta(
                    index,
                    json!({"type": "text_delta", "text": delta}),
                ));
            }

            BackendEvent::TextEnd { content_index } => {
                self.ensure_message_start(&mut out);
                self.blocks.pending_text.remove(content_index);
                let key = BlockKey::new(Channel::Text, *content_index);
                if let Some(index) = self.blocks.find(key) {
                    let was_open = self.blocks.is_open(index);
                    self.blocks.release(index);
                    if was_open {
                        out.push(block_stop(index));
                    }
                }
            }

            BackendEvent::ToolCallStart {
                content_index,
                tool_call,
                partial,
            }
            | BackendEvent::ToolCallDelta {
                content_index,
                tool_call,
                partial,
                ..
            } => {
                self.ensure_message_start(&mut out);
                let known = tool_call
                    .clone()
                    .or_else(|| partial_tool_call(partial.as_ref(), *content_index));
                self.open_tool(*content_index, known.as_ref(), &mut out);
                // Partial argument JSON is held back; arguments are sent once,
                // complete, at toolcall_end.
            }

            BackendEvent::ToolCallEnd {
                content_index,
                tool_call,
            } => {
                self.ensure_message_start(&mut out);
                let (index, meta) = self.open_tool(*content_index, tool_call.as_ref(), &mut out);
                let arguments = tool_call
                    .as_ref()
                    .map(|call| call.arguments.clone())
                    .unwrap_or(Value::Null);
                let input = normalize_tool_arguments(&meta.name, &arguments);
                out.push(block_delta(
                    index,
                    json!({"type": "input_json_delta", "partial_json": input.to_string()}),
                ));
                self.blocks.release(index);
                out.push(block_stop(index));
            }

            BackendEvent::Done { reason, message } => {
                self.ensure_message_start(&mut out);
                self.close_all(&mut out);
                out.push(message_delta(reason.unwrap_or(message.stop_reason), message));
                out.push(SseRecord::new("message_stop", json!({"type": "message_stop"})));
            }

            BackendEvent::Error { error, .. } => {
                self.ensure_message_start(&mut out);
                self.close_all(&mut out);
                let message = error.error_text().unwrap_or(DEFAULT_STREAM_ERROR);
                out.push(SseRecord::new(
                    "error",
                    json!({
                        "type": "error",
                        "error": {"type": "api_error", "message": message},
                    }),
                ));
            }
        }

        out
    }

    fn ensure_message_start(&mut self, out: &mut Vec<SseRecord>) {
        if self.message_started {
            return;
        }
        self.message_started = true;
        out.push(SseRecord::new(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                },
            }),
        ));
    }

    fn open_thinking(&mut self, content_index: usize, out: &mut Vec<SseRecord>) -> usize {
        let index = self
            .blocks
            .allocate(BlockKey::new(Channel::Thinking, content_index));
        if self.blocks.open(index) {
            out.push(block_start(
                index,
                json!({"type": "thinking", "thinking": ""}),
            ));
        }
        self.blocks.thinking_text.entry(index).or_default();
        index
    }

    fn end_thinking(&mut self, content_index: usize, out: &mut Vec<SseRecord>) {
        let key = BlockKey::new(Channel::Thinking, content_index);
        let Some(index) = self.blocks.find(key) else {
            return;
        };
        if !self.blocks.is_open(index) && !self.blocks.thinking_text.contains_key(&index) {
            self.blocks.release(index);
            return;
        }
        self.open_thinking(content_index, out);
        let thinking = self
            .blocks
            .thinking_text
            .get(&index)
            .cloned()
            .unwrap_or_default();
        out.push(signature_delta(index, &thinking));
        self.blocks.release(index);
        out.push(block_stop(index));
    }

    /// Open (or refresh) the tool block for `content_index`, merging any
    /// better name/id the event carries into the stored metadata.
    fn open_tool(
        &mut self,
        content_index: usize,
        known: Option<&ToolCallInfo>,
        out: &mut Vec<SseRecord>,
    ) -> (usize, ToolMeta) {
        let index = self
            .blocks
            .allocate(BlockKey::new(Channel::Tool, content_index));
        let stored = self.blocks.tool_meta.get(&index).cloned().unwrap_or_default();

        let name = known
            .map(|call| call.name.as_str())
            .filter(|n| !n.is_empty())
            .or(Some(stored.name.as_str()).filter(|n| !n.is_empty()))
            .unwrap_or("tool")
            .to_string();
        let raw_id = known
            .map(|call| call.id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(stored.id.as_str());
        let id = sanitize_tool_call_id(raw_id, self.ids.as_ref());

        let meta = ToolMeta { id, name };
        self.blocks.tool_meta.insert(index, meta.clone());

        if self.blocks.open(index) {
            out.push(block_start(
                index,
                json!({"type": "tool_use", "id": meta.id, "name": meta.name, "input": {}}),
            ));
        }
        (index, meta)
    }

    /// Force-close every open block. Thinking blocks get their signature
    /// first.
    fn close_all(&mut self, out: &mut Vec<SseRecord>) {
        for index in self.blocks.open_indices() {
            if let Some(thinking) = self.blocks.thinking_text.get(&index) {
                out.push(signature_delta(index, thinking));
            }
            out.push(block_stop(index));
            self.blocks.release(index);
        }
        self.blocks.clear();
    }
}

/// The tool call at `content_index` of a partial-message snapshot.
fn partial_tool_call(partial: Option<&Completion>, content_index: usize) -> Option<ToolCallInfo> {
    match partial?.content.get(content_index)? {
        ContentBlock::ToolCall {
            id,
            name,
            arguments,
        } => Some(ToolCallInfo {
            id: id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        }),
        _ => None,
    }
}

fn block_start(index: usize, content_block: Value) -> SseRecord {
    SseRecord::new(
        "content_block_start",
        json!({"type": "content_block_start", "index": index, "content_block": content_block}),
    )
}

fn block_delta(index: usize, delta: Value) -> SseRecord {
    SseRecord::new(
        "content_block_delta",
        json!({"type": "content_block_delta", "index": index, "delta": delta}),
    )
}

fn block_stop(index: usize) -> SseRecord {
    SseRecord::new(
        "content_block_stop",
        json!({"type": "content_block_stop", "index": index}),
    )
}

fn signature_delta(index: usize, thinking: &str) -> SseRecord {
    block_delta(
        index,
        json!({"type": "signature_delta", "signature": thinking_signature(thinking)}),
    )
}

fn message_delta(reason: StopReason, message: &Completion) -> SseRecord {
    SseRecord::new(
        "message_delta",
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": map_stop_reason(reason), "stop_sequence": null},
            "usage": WireUsage::from(&message.usage),
        }),
    )
}
