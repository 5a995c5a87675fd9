//! Upstream runner seam.
//!
//! A [`Runner`] executes one normalized conversation against the backend,
//! either to completion or as a stream of [`BackendEvent`]s. The HTTP layer
//! only ever talks to this trait, so tests can script a backend in memory.

mod openai;
pub mod wire;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::bridge::{BackendEvent, Completion, Conversation};
use crate::error::Result;
use crate::router::{Effort, ModelRoute};

pub use openai::{ChunkDecoder, OpenAiRunner};

/// Everything a runner needs for one call.
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Backend model id chosen by the router.
    pub model_id: String,
    pub route: ModelRoute,
    pub conversation: Conversation,
    /// The inbound request body, for sampling options.
    pub request_body: Value,
}

/// Executes conversations against a backend.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run to completion.
    async fn complete(&self, args: RunArgs) -> Result<Completion>;

    /// Open a streamed run. Failures after the stream is open arrive as
    /// [`BackendEvent::Error`].
    async fn stream(&self, args: RunArgs) -> Result<BoxStream<'static, BackendEvent>>;
}

/// Sampling and reasoning options derived from a request and its route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
    /// Backend reasoning level; `None` sends no reasoning setting.
    pub reasoning: Option<String>,
}

impl RunOptions {
    /// Derive options for one call.
    ///
    /// A route override always wins; an empty override disables reasoning.
    /// Without one, `reasoning_enabled` maps the source effort onto backend
    /// levels, defaulting to `minimal`.
    pub fn derive(body: &Value, route: &ModelRoute, reasoning_enabled: bool) -> Self {
        let max_tokens = body
            .get("max_tokens")
            .and_then(Value::as_f64)
            .filter(|n| n.is_finite() && *n > 0.0)
            .map(|n| n.ceil() as u64);
        let temperature = body
            .get("temperature")
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite());

        let reasoning = match route.reasoning_override() {
            Some(level) if !level.is_empty() => Some(level.to_string()),
            Some(_) => None,
            None if reasoning_enabled => {
                Some(backend_reasoning_for(route.source_effort).to_string())
            }
            None => None,
        };

        Self {
            max_tokens,
            temperature,
            reasoning,
        }
    }
}

fn backend_reasoning_for(effort: Option<Effort>) -> &'static str {
    match effort {
        Some(Effort::Medium) => "medium",
        Some(Effort::High) => "high",
        Some(Effort::Max) => "xhigh",
        _ => "minimal",
    }
}
