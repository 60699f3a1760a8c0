//! Store abstractions
//!
//! TaskStore owns the lifecycle invariants: every mutation goes through
//! `update`, which serialises concurrent updates on one id while distinct
//! tasks progress in parallel. Implementations live in forecourt-stores.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Task;

/// Store error types
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    /// Invariant violation. A programming error, never caller-facing.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A single mutation applied under the task's exclusion guard.
pub type TaskMutator<'a> = Box<dyn FnOnce(&mut Task) -> Result<(), StoreError> + Send + 'a>;

/// Task persistence and lifecycle guarding.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a freshly created task.
    async fn create(&self, task: Task) -> Result<(), StoreError>;

    /// Snapshot a task by id. Readers never observe partial mutations.
    async fn get(&self, id: &str) -> Result<Task, StoreError>;

    /// Apply `mutate` under exclusion and return the updated snapshot.
    /// If the mutator errors the stored task is left untouched.
    async fn update(&self, id: &str, mutate: TaskMutator<'_>) -> Result<Task, StoreError>;

    /// Tasks still progressing through the pipeline.
    async fn list_active(&self) -> Result<Vec<Task>, StoreError>;
}
