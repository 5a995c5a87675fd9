//! HTTP transport.
//!
//! This module exposes the Messages-protocol HTTP API: it parses requests,
//! hands them to the bridge and router, runs them through a [`Runner`], and
//! writes back either one message or an SSE stream.
//!
//! [`Runner`]: crate::runner::Runner

mod handlers;
pub mod recovery;
pub mod redact;
mod server;

pub use recovery::{collect_stream, needs_recovery, CompletionCollector};
pub use redact::redact_for_logging;
pub use server::{create_router, run_server, AppState};
