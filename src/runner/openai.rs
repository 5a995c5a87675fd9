//! Runner for OpenAI-compatible `/chat/completions` backends.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;

use super::wire::{ChatCompletionChunk, ChatCompletionRequest, ChatUsage, ChoiceMessage};
use super::{RunArgs, RunOptions, Runner};
use crate::bridge::{BackendEvent, Completion, ContentBlock, StopReason, ToolCallInfo, Usage};
use crate::config::{ApiKey, UpstreamConfig};
use crate::error::{Error, Result};

/// Talks to an OpenAI-compatible chat-completions API over HTTP.
#[derive(Debug, Clone)]
pub struct OpenAiRunner {
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
    reasoning_enabled: bool,
}

impl OpenAiRunner {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<ApiKey>,
        reasoning_enabled: bool,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            reasoning_enabled,
        }
    }

    /// Build a runner with its own HTTP client from upstream settings.
    pub fn from_config(upstream: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::new(
            client,
            upstream.url.clone(),
            upstream.api_key.clone(),
            upstream.reasoning,
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, args: &RunArgs, stream: bool) -> ChatCompletionRequest {
        let options = RunOptions::derive(&args.request_body, &args.route, self.reasoning_enabled);
        ChatCompletionRequest::from_conversation(&args.model_id, &args.conversation, &options, stream)
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let mut upstream_request = self
            .client
            .post(self.endpoint())
            .header(header::CONTENT_TYPE, "application/json")
            .json(request);

        if let Some(api_key) = &self.api_key {
            upstream_request = upstream_request.bearer_auth(api_key.expose_secret());
        }

        let response = upstream_request.send().await.map_err(|e| {
            tracing::error!(error = %e, url = %self.base_url, "Failed to reach upstream");
            Error::Upstream(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Upstream returned error");
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                message: upstream_error_message(&body, status),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Runner for OpenAiRunner {
    async fn complete(&self, args: RunArgs) -> Result<Completion> {
        let request = self.build_request(&args, false);
        let response = self.send(&request).await?;
        let chunk: ChatCompletionChunk = response.json().await?;
        Ok(parse_completion(&chunk))
    }

    async fn stream(&self, args: RunArgs) -> Result<BoxStream<'static, BackendEvent>> {
        let request = self.build_request(&args, true);
        let response = self.send(&request).await?;

        let bytes = response.bytes_stream().boxed();
        let events = stream::unfold(Some((bytes, ChunkDecoder::new())), |state| async move {
            let (mut bytes, mut decoder) = state?;
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = decoder.push(&chunk);
                    Some((events, Some((bytes, decoder))))
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Error streaming from upstream");
                    Some((decoder.fail(&e.to_string()), None))
                }
                None => Some((decoder.finish(), None)),
            }
        })
        .flat_map(stream::iter);

        Ok(events.boxed())
    }
}

/// Pull a readable message out of an error response body.
fn upstream_error_message(body: &str, status: reqwest::StatusCode) -> String {
    let parsed = serde_json::from_str::<ChatCompletionChunk>(body)
        .ok()
        .and_then(|chunk| chunk.error_message());
    match parsed {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("Upstream error")
            .to_string(),
    }
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::Length,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        _ => StopReason::Stop,
    }
}

fn map_usage(usage: &ChatUsage) -> Usage {
    let cached = usage
        .prompt_tokens_details
        .as_ref()
        .map(|d| d.cached_tokens)
        .unwrap_or(0);
    Usage {
        input: usage.prompt_tokens.saturating_sub(cached),
        output: usage.completion_tokens,
        cache_read: cached,
        cache_write: 0,
    }
}

/// Arguments as JSON when they parse, otherwise the raw string.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Convert a non-streaming response body into a [`Completion`].
pub(crate) fn parse_completion(chunk: &ChatCompletionChunk) -> Completion {
    let usage = chunk.usage.as_ref().map(map_usage).unwrap_or_default();

    let Some(choice) = chunk.first_choice() else {
        return Completion {
            stop_reason: StopReason::Error,
            usage,
            error_message: Some(
                chunk
                    .error_message()
                    .unwrap_or_else(|| "Upstream returned no choices".to_string()),
            ),
            ..Completion::default()
        };
    };

    let message = choice.message.clone().unwrap_or_default();
    let mut content = Vec::new();
    if let Some(reasoning) = message.reasoning_text() {
        content.push(ContentBlock::Thinking {
            thinking: reasoning.to_string(),
        });
    }
    if let Some(text) = message.content_text() {
        content.push(ContentBlock::text(text));
    }
    for call in message.tool_calls() {
        let function = call.function.clone().unwrap_or_default();
        content.push(ContentBlock::ToolCall {
            id: call.id.clone().unwrap_or_default(),
            name: function.name.unwrap_or_default(),
            arguments: parse_arguments(function.arguments.as_deref().unwrap_or_default()),
        });
    }

    Completion {
        content,
        stop_reason: choice
            .finish_reason
            .as_deref()
            .map(map_finish_reason)
            .unwrap_or_default(),
        usage,
        error_message: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(usize),
    Thinking(usize),
}

#[derive(Debug, Default)]
struct PendingToolCall {
    content_index: usize,
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn info(&self, arguments: Value) -> ToolCallInfo {
        ToolCallInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments,
        }
    }
}

/// Line-buffered decoder from chat-completions SSE bytes to backend events.
///
/// Buffers raw bytes across chunk boundaries, reassembles complete SSE lines,
/// and assigns content indices in the order blocks first appear. Text and
/// thinking blocks close as soon as the content kind changes; tool calls
/// finish when the stream ends.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
    started: bool,
    finished: bool,
    open: Option<OpenBlock>,
    /// Assembled content, indexed by content index.
    blocks: Vec<ContentBlock>,
    /// Keyed by the upstream tool-call index.
    tools: BTreeMap<usize, PendingToolCall>,
    stop_reason: StopReason,
    usage: Usage,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Process a chunk of bytes from the SSE stream.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<BackendEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.process_line(line.trim_end_matches(['\r', '\n']), &mut events);
        }

        events
    }

    /// Terminate the stream with an error.
    pub fn fail(&mut self, message: &str) -> Vec<BackendEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        self.finished = true;
        events.push(BackendEvent::Error {
            reason: Some(StopReason::Error),
            error: Completion {
                content: self.blocks.clone(),
                stop_reason: StopReason::Error,
                usage: self.usage,
                error_message: Some(message.to_string()),
            },
        });
        events
    }

    /// Flush buffered input and finish the stream.
    pub fn finish(&mut self) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.process_line(line.trim_end_matches(['\r', '\n']), &mut events);
        }
        self.complete(&mut events);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<BackendEvent>) {
        if self.finished {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.complete(events);
            return;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream chunk");
                return;
            }
        };

        if let Some(message) = chunk.error_message() {
            events.extend(self.fail(&message));
            return;
        }

        self.ensure_started(events);

        if let Some(usage) = &chunk.usage {
            self.usage = map_usage(usage);
        }

        let Some(choice) = chunk.first_choice() else {
            return;
        };
        if let Some(delta) = &choice.delta {
            self.process_delta(delta, events);
        }
        if let Some(reason) = &choice.finish_reason {
            self.stop_reason = map_finish_reason(reason);
        }
    }

    fn process_delta(&mut self, delta: &ChoiceMessage, events: &mut Vec<BackendEvent>) {
        if let Some(reasoning) = delta.reasoning_text() {
            let open = self.open;
            let index = match open {
                Some(OpenBlock::Thinking(index)) => index,
                _ => {
                    self.close_open(events);
                    let index = self.push_block(ContentBlock::Thinking {
                        thinking: String::new(),
                    });
                    self.open = Some(OpenBlock::Thinking(index));
                    events.push(BackendEvent::ThinkingStart {
                        content_index: index,
                    });
                    index
                }
            };
            if let Some(ContentBlock::Thinking { thinking }) = self.blocks.get_mut(index) {
                thinking.push_str(reasoning);
            }
            events.push(BackendEvent::ThinkingDelta {
                content_index: index,
                delta: reasoning.to_string(),
            });
        }

        if let Some(text) = delta.content_text() {
            let open = self.open;
            let index = match open {
                Some(OpenBlock::Text(index)) => index,
                _ => {
                    self.close_open(events);
                    let index = self.push_block(ContentBlock::text(""));
                    self.open = Some(OpenBlock::Text(index));
                    events.push(BackendEvent::TextStart {
                        content_index: index,
                    });
                    index
                }
            };
            if let Some(ContentBlock::Text { text: buffer }) = self.blocks.get_mut(index) {
                buffer.push_str(text);
            }
            events.push(BackendEvent::TextDelta {
                content_index: index,
                delta: text.to_string(),
            });
        }

        for (position, fragment) in delta.tool_calls().iter().enumerate() {
            self.close_open(events);
            let key = fragment.index.unwrap_or(position);
            let function = fragment.function.clone().unwrap_or_default();

            if !self.tools.contains_key(&key) {
                let content_index = self.push_block(ContentBlock::ToolCall {
                    id: String::new(),
                    name: String::new(),
                    arguments: Value::Null,
                });
                let pending = PendingToolCall {
                    content_index,
                    id: fragment.id.clone().unwrap_or_default(),
                    name: function.name.clone().unwrap_or_default(),
                    arguments: String::new(),
                };
                events.push(BackendEvent::ToolCallStart {
                    content_index,
                    tool_call: Some(pending.info(Value::Null)),
                    partial: None,
                });
                self.tools.insert(key, pending);
            }

            let Some(pending) = self.tools.get_mut(&key) else {
                continue;
            };
            if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
                pending.id = id.to_string();
            }
            if let Some(name) = function.name.as_deref().filter(|name| !name.is_empty()) {
                pending.name = name.to_string();
            }
            if let Some(arguments) = function.arguments.as_deref().filter(|a| !a.is_empty()) {
                pending.arguments.push_str(arguments);
                events.push(BackendEvent::ToolCallDelta {
                    content_index: pending.content_index,
                    delta: arguments.to_string(),
                    tool_call: Some(pending.info(Value::Null)),
                    partial: None,
                });
            }
        }
    }

    fn push_block(&mut self, block: ContentBlock) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    fn ensure_started(&mut self, events: &mut Vec<BackendEvent>) {
        if !self.started {
            self.started = true;
            events.push(BackendEvent::Start);
        }
    }

    fn close_open(&mut self, events: &mut Vec<BackendEvent>) {
        match self.open.take() {
            Some(OpenBlock::Text(index)) => events.push(BackendEvent::TextEnd {
                content_index: index,
            }),
            Some(OpenBlock::Thinking(index)) => events.push(BackendEvent::ThinkingEnd {
                content_index: index,
            }),
            None => {}
        }
    }

    fn complete(&mut self, events: &mut Vec<BackendEvent>) {
        if self.finished {
            return;
        }
        self.ensure_started(events);
        self.close_open(events);

        for pending in std::mem::take(&mut self.tools).into_values() {
            let arguments = parse_arguments(&pending.arguments);
            if let Some(slot) = self.blocks.get_mut(pending.content_index) {
                *slot = ContentBlock::ToolCall {
                    id: pending.id.clone(),
                    name: pending.name.clone(),
                    arguments: arguments.clone(),
                };
            }
            events.push(BackendEvent::ToolCallEnd {
                content_index: pending.content_index,
                tool_call: Some(pending.info(arguments)),
            });
        }

        self.finished = true;
        events.push(BackendEvent::Done {
            reason: Some(self.stop_reason),
            message: Completion {
                content: std::mem::take(&mut self.blocks),
                stop_reason: self.stop_reason,
                usage: self.usage,
                error_message: None,
            },
        });
    }
}
