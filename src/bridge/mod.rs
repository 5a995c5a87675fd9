//! The protocol bridge.
//!
//! Pure conversions between the Messages wire protocol and the
//! backend-neutral conversation model:
//! - [`normalize_request`]: inbound request body to [`Conversation`]
//! - [`synthesize_response`]: one [`Completion`] to one wire message
//! - [`StreamTranslator`]: backend events to SSE records, one per stream
//! - [`estimate_input_tokens`]: rough token count for a request body

pub mod ids;
pub mod normalize;
pub mod stream;
pub mod synthesize;
pub mod tokens;
pub mod types;

pub use ids::{sanitize_tool_call_id, IdGenerator, RandomIds, SequentialIds};
pub use normalize::normalize_request;
pub use stream::{BlockKey, BlockTable, Channel, SseRecord, StreamTranslator};
pub use synthesize::{
    map_stop_reason, normalize_tool_arguments, synthesize_response, thinking_signature,
    SynthesisOptions, WireBlock, WireMessage, WireUsage,
};
pub use tokens::estimate_input_tokens;
pub use types::{
    BackendEvent, Completion, ContentBlock, Conversation, ConversationTurn, StopReason,
    ToolCallInfo, ToolSpec, Usage, UserContent,
};
