//! Router module for backend model selection.
//!
//! This module resolves a requested model id into a backend model based on:
//! - The configured routing table (exact keys, prefix aliases, per-provider
//!   variants, a default entry)
//! - The reasoning effort the request asks for
//! - Model-family guards for the active provider

mod effort;
mod selector;
mod table;

pub use effort::{infer_source_effort, normalize_target_reasoning, Effort};
pub use selector::{FamilyRule, ModelRoute, ModelRouter, HARD_DEFAULT_MODEL};
pub use table::{Alias, ReasoningConfig, RouteSpec, RouteTarget, RoutingTable, TableEntry};
