//! msgbridge - Messages-protocol gateway for OpenAI-style backends
//!
//! This library provides the core of the msgbridge gateway:
//! - [`bridge`]: request normalization, response synthesis and stream
//!   translation between the Messages protocol and a backend-neutral
//!   conversation
//! - [`router`]: backend model and reasoning selection
//! - [`runner`]: the upstream seam and an OpenAI-compatible implementation
//! - [`proxy`]: the HTTP transport

pub mod bridge;
pub mod config;
pub mod error;
pub mod proxy;
pub mod router;
pub mod runner;

pub use config::Config;
pub use error::{Error, Result};
