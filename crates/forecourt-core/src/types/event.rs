//! Task lifecycle events for monitoring and audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus};

/// One observed state transition, published by the engine on every
/// successful store update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLifecycleEvent {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

impl TaskLifecycleEvent {
    pub fn new(task_id: impl Into<TaskId>, from: TaskStatus, to: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            from,
            to,
            at: Utc::now(),
        }
    }
}
