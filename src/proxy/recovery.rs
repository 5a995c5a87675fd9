//! Rebuilding a completion from a streamed retry.
//!
//! Some backends answer a non-streamed call with an empty failed message but
//! still produce content when streamed. [`CompletionCollector`] folds the
//! event stream back into one [`Completion`].

use std::collections::HashMap;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use crate::bridge::{BackendEvent, Completion, ContentBlock, ToolCallInfo};

/// Whether a non-streamed completion should be retried as a stream: nothing
/// visible came back and the backend reported a failure.
pub fn needs_recovery(completion: &Completion) -> bool {
    !completion.has_visible_content()
        && (completion.stop_reason.is_failure() || completion.error_text().is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Part {
    Thinking(usize),
    Text(usize),
    Tool(usize),
}

/// Accumulates streamed deltas per content index, in first-seen order.
#[derive(Debug, Default)]
pub struct CompletionCollector {
    order: Vec<Part>,
    text: HashMap<Part, String>,
    tools: HashMap<Part, ToolCallInfo>,
    terminal: Option<Completion>,
}

impl CompletionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, part: Part) {
        if !self.order.contains(&part) {
            self.order.push(part);
        }
    }

    fn append(&mut self, part: Part, delta: &str) {
        self.record(part);
        if !delta.is_empty() {
            self.text.entry(part).or_default().push_str(delta);
        }
    }

    pub fn observe(&mut self, event: &BackendEvent) {
        match event {
            BackendEvent::ThinkingDelta {
                content_index,
                delta,
            } => self.append(Part::Thinking(*content_index), delta),
            BackendEvent::TextDelta {
                content_index,
                delta,
            } => self.append(Part::Text(*content_index), delta),
            BackendEvent::ToolCallEnd {
                content_index,
                tool_call: Some(call),
            } => {
                let part = Part::Tool(*content_index);
                self.record(part);
                self.tools.insert(part, call.clone());
            }
            BackendEvent::Done { message, .. } => self.terminal = Some(message.clone()),
            BackendEvent::Error { error, .. } => self.terminal = Some(error.clone()),
            _ => {}
        }
    }

    fn assembled_content(&self) -> Vec<ContentBlock> {
        self.order
            .iter()
            .filter_map(|part| match part {
                Part::Thinking(_) => self
                    .text
                    .get(part)
                    .filter(|t| !t.is_empty())
                    .map(|thinking| ContentBlock::Thinking {
                        thinking: thinking.clone(),
                    }),
                Part::Text(_) => self
                    .text
                    .get(part)
                    .filter(|t| !t.is_empty())
                    .map(ContentBlock::text),
                Part::Tool(index) => {
                    let call = self.tools.get(part)?;
                    if call.name.is_empty() {
                        return None;
                    }
                    let id = if call.id.is_empty() {
                        format!("tool_{}", index)
                    } else {
                        call.id.clone()
                    };
                    let arguments = match &call.arguments {
                        Value::Object(_) => call.arguments.clone(),
                        _ => Value::Object(Default::default()),
                    };
                    Some(ContentBlock::ToolCall {
                        id,
                        name: call.name.clone(),
                        arguments,
                    })
                }
            })
            .collect()
    }

    /// The recovered completion.
    ///
    /// The terminal message wins when it has visible content; otherwise the
    /// accumulated content replaces its (empty) content. `None` when the
    /// stream produced neither a terminal message nor any content.
    pub fn finish(self) -> Option<Completion> {
        if let Some(terminal) = self.terminal.as_ref().filter(|t| t.has_visible_content()) {
            return Some(terminal.clone());
        }

        let content = self.assembled_content();
        if content.is_empty() {
            return self.terminal;
        }

        Some(Completion {
            content,
            ..self.terminal.unwrap_or_default()
        })
    }
}

/// Drain a backend stream into a single completion.
pub async fn collect_stream(mut events: BoxStream<'static, BackendEvent>) -> Option<Completion> {
    let mut collector = CompletionCollector::new();
    while let Some(event) = events.next().await {
        collector.observe(&event);
    }
    collector.finish()
}
