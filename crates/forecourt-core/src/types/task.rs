//! Task type definitions
//!
//! Task is the unit of work: one user query moving through the three-tier
//! pipeline under a single identity. Transitions are guarded here; the
//! TaskStore serialises concurrent updates per id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::fingerprint::Fingerprint;
use crate::store::StoreError;

use super::Draft;

/// Type alias for Task ID
pub type TaskId = String;

/// Query complexity classes, in ascending order of rigour.
///
/// Drives specialist selection and the validator's approval threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
    Critical,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Standard => "standard",
            Complexity::Complex => "complex",
            Complexity::Critical => "critical",
        }
    }

    /// Whether this class is routed to the senior specialist.
    pub fn needs_senior(&self) -> bool {
        matches!(self, Complexity::Complex | Complexity::Critical)
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet picked up
    Pending,
    /// Tier 1 classifying the query
    Analyzing,
    /// Tier 2 drafting an insight
    Generating,
    /// Tier 3 scoring the draft
    Validating,
    /// Validator requested a revision cycle
    Revising,
    /// A draft passed the quality gate
    Approved,
    /// Revision budget exhausted without an approvable draft
    Rejected,
    /// Non-recoverable error
    Failed,
    /// Overall deadline exceeded
    TimedOut,
    /// Response formatted and returned to the caller
    Delivered,
}

impl TaskStatus {
    /// Terminal statuses admit no further transitions, with the single
    /// carve-out `Approved -> Delivered` for response formatting.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Approved
                | TaskStatus::Delivered
                | TaskStatus::Rejected
                | TaskStatus::Failed
                | TaskStatus::TimedOut
        )
    }

    /// Check if the task is still progressing through the pipeline
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending
                | TaskStatus::Analyzing
                | TaskStatus::Generating
                | TaskStatus::Validating
                | TaskStatus::Revising
        )
    }

    /// Whether `next` is a legal transition from this status.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Analyzing) => true,
            (Analyzing, Generating) => true,
            (Generating, Validating) => true,
            (Validating, Revising) => true,
            (Validating, Approved) => true,
            (Validating, Rejected) => true,
            (Revising, Generating) => true,
            (Approved, Delivered) => true,
            (current, Failed) | (current, TimedOut) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Generating => "generating",
            TaskStatus::Validating => "validating",
            TaskStatus::Revising => "revising",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Delivered => "delivered",
        }
    }

    /// Which tier holds responsibility in this status. Tiers only climb on
    /// forward transitions and drop back to 2 on a revision cycle; approval
    /// and delivery settle at tier 3. `None` for terminal failures, which
    /// retain whatever tier the task failed in.
    pub fn tier(&self) -> Option<u8> {
        match self {
            TaskStatus::Pending | TaskStatus::Analyzing => Some(1),
            TaskStatus::Generating | TaskStatus::Revising => Some(2),
            TaskStatus::Validating
            | TaskStatus::Approved
            | TaskStatus::Rejected
            | TaskStatus::Delivered => Some(3),
            TaskStatus::Failed | TaskStatus::TimedOut => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded task-level error event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub at: DateTime<Utc>,
    /// Stable snake_case label, e.g. `classification_malformed`, `partial_data`
    pub kind: String,
    pub message: String,
}

/// Task - the unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, stable across logs (`TASK-xxxxxxxx`)
    pub id: TaskId,
    /// The raw user question
    pub query: String,
    /// Dealership identifier scoping all data access
    pub tenant_id: String,
    /// Caller-supplied hints, opaque to the pipeline
    pub context: BTreeMap<String, Value>,
    /// Cache/coalescing key for this query + tenant
    pub fingerprint: Fingerprint,
    /// Assigned by the dispatcher during analysis
    #[serde(default)]
    pub complexity: Option<Complexity>,
    pub status: TaskStatus,
    pub current_tier: u8,
    /// Append-only, oldest first
    #[serde(default)]
    pub drafts: Vec<Draft>,
    /// Index into `drafts` of the approved draft
    #[serde(default)]
    pub validated_draft: Option<usize>,
    /// Revision cycles entered (0 on the first draft)
    #[serde(default)]
    pub revisions_used: u32,
    #[serde(default)]
    pub errors: Vec<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Absolute time by which the engine must answer
    pub deadline: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task
    pub fn new(
        query: impl Into<String>,
        tenant_id: impl Into<String>,
        context: BTreeMap<String, Value>,
        fingerprint: Fingerprint,
        deadline: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_task_id(),
            query: query.into(),
            tenant_id: tenant_id.into(),
            context,
            fingerprint,
            complexity: None,
            status: TaskStatus::Pending,
            current_tier: 1,
            drafts: Vec::new(),
            validated_draft: None,
            revisions_used: 0,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            deadline,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), StoreError> {
        if !self.status.can_transition(next) {
            return Err(StoreError::PreconditionFailed(format!(
                "task {}: illegal transition {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if let Some(tier) = next.tier() {
            self.current_tier = tier;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a draft. Drafts are append-only and frozen once the task settles.
    pub fn push_draft(&mut self, draft: Draft) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::PreconditionFailed(format!(
                "task {}: draft appended in terminal status {}",
                self.id, self.status
            )));
        }
        self.drafts.push(draft);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the draft at `index` as the validated one.
    pub fn set_validated(&mut self, index: usize) -> Result<(), StoreError> {
        if index >= self.drafts.len() {
            return Err(StoreError::PreconditionFailed(format!(
                "task {}: validated draft index {} out of range",
                self.id, index
            )));
        }
        self.validated_draft = Some(index);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a task-level error event
    pub fn record_error(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.errors.push(TaskError {
            at: Utc::now(),
            kind: kind.into(),
            message: message.into(),
        });
        self.updated_at = Utc::now();
    }

    /// The approved draft, if any
    pub fn validated(&self) -> Option<&Draft> {
        self.validated_draft.and_then(|i| self.drafts.get(i))
    }
}

fn new_task_id() -> TaskId {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("TASK-{}", &hex[..8])
}
