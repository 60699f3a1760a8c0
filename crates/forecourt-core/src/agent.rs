//! Tier abstractions
//!
//! The dispatcher and validator are concrete components; the Tier-2
//! specialists are a closed pair behind the Specialist trait so the engine
//! can route by complexity without caring which variant drafts.

use async_trait::async_trait;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client::{ModelError, WarehouseError};
use crate::store::StoreError;
use crate::types::{Complexity, Draft, DraftContent, SpecialistKind, TaskId, ValidationScores};

/// Tier-level errors. Transport retries happen below this layer; a Model or
/// Warehouse variant here means retries are already exhausted.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("classification failed: {0}")]
    ClassificationFailed(String),

    #[error("specialist failed: {0}")]
    SpecialistFailed(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dispatcher classification result.
#[derive(Debug, Clone)]
pub struct Classification {
    pub complexity: Complexity,
    /// Logical data sources the specialist should read, e.g. `sales`.
    pub required_data_sources: Vec<String>,
    pub specialist: SpecialistKind,
}

/// Everything a specialist needs to produce one draft.
#[derive(Debug, Clone)]
pub struct DraftContext {
    pub task_id: TaskId,
    pub query: String,
    pub tenant_id: String,
    pub complexity: Complexity,
    pub required_data_sources: Vec<String>,
    /// Validator feedback, passed through verbatim on revision cycles.
    pub revision_feedback: Vec<String>,
    /// Content of the draft being revised, if any.
    pub previous: Option<DraftContent>,
    /// Rows beyond this count are summarised as aggregates in the prompt.
    pub max_rows_in_prompt: usize,
    /// Row cap per warehouse read.
    pub row_limit: usize,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

/// Tier-2 drafting interface, implemented by the standard and senior
/// specialists.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn kind(&self) -> SpecialistKind;

    /// Produce a draft, honouring revision feedback when present.
    async fn draft(&self, ctx: &DraftContext) -> Result<Draft, AgentError>;
}

/// Validator gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationDecision {
    Approve,
    Revise,
    Reject,
}

/// Full validator output for one draft.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub decision: ValidationDecision,
    pub scores: ValidationScores,
    pub quality_score: f64,
    /// One concrete remediation per failing axis, empty on approval.
    pub feedback: Vec<String>,
}
