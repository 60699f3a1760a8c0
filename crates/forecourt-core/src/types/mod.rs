//! Core type definitions for Forecourt
//!
//! This module contains the fundamental types used throughout the system:
//! - Task: one end-to-end processing of a user query, with its lifecycle
//! - Draft: a specialist's candidate answer under validation
//! - InsightRequest / InsightResponse: the in-process API contract
//! - TaskLifecycleEvent: monitoring/audit record of state transitions

mod draft;
mod event;
mod request;
mod response;
mod task;

pub use draft::{
    Draft, DraftContent, Priority, QueryRecord, Recommendation, SpecialistKind, ValidationScores,
};
pub use event::TaskLifecycleEvent;
pub use request::InsightRequest;
pub use response::{
    ConfidenceLevel, FlowFailure, InsightResponse, ResponseMetadata, Visualization,
    VisualizationKind,
};
pub use task::{Complexity, Task, TaskError, TaskId, TaskStatus};
