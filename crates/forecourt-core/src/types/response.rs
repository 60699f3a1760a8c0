//! Caller-visible response shapes
//!
//! These are the contract an embedding HTTP layer serialises. Success is an
//! InsightResponse; every failure mode is a typed FlowFailure variant so the
//! engine decides control flow on tags, not caught exceptions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Complexity, DraftContent, TaskId};

/// Caller-visible confidence label derived from the validator's aggregate
/// quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Moderate,
    Low,
    #[serde(rename = "Very Low")]
    VeryLow,
}

impl ConfidenceLevel {
    /// Fixed banding over the aggregate quality score.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            ConfidenceLevel::VeryHigh
        } else if score >= 0.85 {
            ConfidenceLevel::High
        } else if score >= 0.70 {
            ConfidenceLevel::Moderate
        } else if score >= 0.50 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::VeryHigh => "Very High",
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Moderate => "Moderate",
            ConfidenceLevel::Low => "Low",
            ConfidenceLevel::VeryLow => "Very Low",
        }
    }
}

/// Suggested chart type for the frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationKind {
    Line,
    Bar,
    Pie,
    Table,
    Heatmap,
    Scatter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    pub config: Value,
}

/// Response metadata for observability and caching semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub task_id: TaskId,
    pub complexity: Complexity,
    pub processing_time_ms: u64,
    pub revisions_used: u32,
    pub cached: bool,
}

/// Success payload for a delivered task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightResponse {
    pub summary: String,
    pub detailed: DraftContent,
    pub confidence_level: ConfidenceLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
    pub metadata: ResponseMetadata,
}

/// Typed failure responses, tagged with the `error` field callers match on.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum FlowFailure {
    #[error("invalid request: {detail}")]
    InvalidRequest { detail: String },

    #[error("engine overloaded, retry after {retry_after_ms}ms")]
    Overloaded { retry_after_ms: u64 },

    #[error("task {task_id} timed out after {elapsed_ms}ms")]
    TimedOut { task_id: TaskId, elapsed_ms: u64 },

    #[error("task {task_id} rejected after {revisions_used} revision(s)")]
    QualityRejected {
        task_id: TaskId,
        last_feedback: Vec<String>,
        revisions_used: u32,
    },

    #[error("model unavailable for task {task_id}")]
    ModelUnavailable { task_id: TaskId },

    #[error("warehouse unavailable for task {task_id}")]
    WarehouseUnavailable { task_id: TaskId },

    #[error("classification failed for task {task_id}")]
    ClassificationFailed { task_id: TaskId },

    #[error("specialist produced no draft for task {task_id}")]
    SpecialistFailed { task_id: TaskId },
}
