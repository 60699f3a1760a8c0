//! # Forecourt Engine
//!
//! The hierarchical flow orchestrator: a three-tier task state machine
//! (dispatch -> specialist -> validator -> dispatch) with bounded revision
//! loops, per-task deadlines, result caching, request coalescing, and an
//! admission cap.
//!
//! One `FlowEngine::process` call takes a natural-language dealership
//! query end to end and returns either a structured insight with a
//! confidence label or a typed failure.

mod flow;
mod metrics;

pub use flow::{FlowEngine, TaskSnapshot};
pub use metrics::MetricsSnapshot;

// Re-export the request/response contract for embedders
pub use forecourt_core::types::{
    FlowFailure, InsightRequest, InsightResponse, TaskLifecycleEvent, TaskStatus,
};
