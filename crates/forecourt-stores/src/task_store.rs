//! TaskStore in-memory implementation.
//!
//! Each task sits behind its own async mutex: updates on one id serialise,
//! distinct tasks never contend. Mutators run against a clone and commit
//! only on success, so readers always see a consistent snapshot.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use forecourt_core::store::{StoreError, TaskMutator, TaskStore};
use forecourt_core::types::Task;

const DEFAULT_IN_MEMORY_TASK_LIMIT: usize = 5_000;

type TaskSlot = Arc<Mutex<Task>>;

/// In-memory task store with bounded retention of settled tasks.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, TaskSlot>>,
    /// Insertion order, for retention eviction
    order: RwLock<VecDeque<String>>,
    max_tasks: usize,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_max_tasks(DEFAULT_IN_MEMORY_TASK_LIMIT)
    }

    /// Create a store with a hard retention limit. Terminal tasks are
    /// evicted oldest-first once the limit is reached; active tasks are
    /// never evicted.
    pub fn with_max_tasks(max_tasks: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_tasks: max_tasks.max(1),
        }
    }

    fn slot(&self, id: &str) -> Result<TaskSlot, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn all_slots(&self) -> Result<Vec<TaskSlot>, StoreError> {
        let tasks = self
            .tasks
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(tasks.values().cloned().collect())
    }

    async fn evict_oldest_settled(&self) -> Result<(), StoreError> {
        let candidates: Vec<String> = {
            let order = self
                .order
                .read()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            order.iter().cloned().collect()
        };

        for id in candidates {
            let Ok(slot) = self.slot(&id) else { continue };
            let terminal = {
                let task = slot.lock().await;
                task.status.is_terminal()
            };
            if !terminal {
                continue;
            }

            let mut tasks = self
                .tasks
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            tasks.remove(&id);
            drop(tasks);

            let mut order = self
                .order
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            order.retain(|o| o != &id);
            return Ok(());
        }
        Ok(())
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> Result<(), StoreError> {
        let over_limit = {
            let tasks = self
                .tasks
                .read()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            if tasks.contains_key(&task.id) {
                return Err(StoreError::PreconditionFailed(format!(
                    "task {} already exists",
                    task.id
                )));
            }
            tasks.len() >= self.max_tasks
        };
        if over_limit {
            self.evict_oldest_settled().await?;
        }

        let id = task.id.clone();

        let mut tasks = self
            .tasks
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        tasks.insert(id.clone(), Arc::new(Mutex::new(task)));
        drop(tasks);

        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        order.push_back(id);

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        let slot = self.slot(id)?;
        let task = slot.lock().await;
        Ok(task.clone())
    }

    async fn update(&self, id: &str, mutate: TaskMutator<'_>) -> Result<Task, StoreError> {
        let slot = self.slot(id)?;
        let mut task = slot.lock().await;
        // Commit-on-success: a failed mutator must leave no partial state.
        let mut candidate = task.clone();
        mutate(&mut candidate)?;
        *task = candidate.clone();
        Ok(candidate)
    }

    async fn list_active(&self) -> Result<Vec<Task>, StoreError> {
        let mut active = Vec::new();
        for slot in self.all_slots()? {
            let task = slot.lock().await;
            if task.status.is_active() {
                active.push(task.clone());
            }
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forecourt_core::fingerprint::Fingerprint;
    use forecourt_core::types::TaskStatus;
    use std::collections::BTreeMap;

    fn sample_task(query: &str) -> Task {
        Task::new(
            query,
            "dealer_123",
            BTreeMap::new(),
            Fingerprint::compute(query, "dealer_123", &BTreeMap::new(), &[]),
            Utc::now() + chrono::Duration::seconds(30),
        )
    }

    #[test]
    fn test_create_get_roundtrip() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let task = sample_task("units sold last month");
            let id = task.id.clone();
            store.create(task).await.unwrap();

            let loaded = store.get(&id).await.unwrap();
            assert_eq!(loaded.id, id);
            assert_eq!(loaded.status, TaskStatus::Pending);
            assert!(matches!(
                store.get("TASK-missing0").await,
                Err(StoreError::NotFound(_))
            ));
        });
    }

    #[test]
    fn test_duplicate_create_rejected() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let task = sample_task("inventory on lot");
            store.create(task.clone()).await.unwrap();
            assert!(matches!(
                store.create(task).await,
                Err(StoreError::PreconditionFailed(_))
            ));
        });
    }

    #[test]
    fn test_failed_mutator_leaves_task_untouched() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let task = sample_task("units sold");
            let id = task.id.clone();
            store.create(task).await.unwrap();

            let result = store
                .update(
                    &id,
                    Box::new(|task| {
                        task.revisions_used = 7;
                        // Illegal jump: pending -> delivered
                        task.transition(TaskStatus::Delivered)
                    }),
                )
                .await;
            assert!(matches!(result, Err(StoreError::PreconditionFailed(_))));

            let loaded = store.get(&id).await.unwrap();
            assert_eq!(loaded.revisions_used, 0);
            assert_eq!(loaded.status, TaskStatus::Pending);
        });
    }

    #[test]
    fn test_retention_evicts_only_settled_tasks() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::with_max_tasks(2);
            let first = sample_task("query one");
            let first_id = first.id.clone();
            store.create(first).await.unwrap();
            store
                .update(
                    &first_id,
                    Box::new(|task| {
                        task.transition(TaskStatus::Analyzing)?;
                        task.transition(TaskStatus::Failed)
                    }),
                )
                .await
                .unwrap();

            let second = sample_task("query two");
            let second_id = second.id.clone();
            store.create(second).await.unwrap();

            let third = sample_task("query three");
            store.create(third).await.unwrap();

            // The settled task went; the active one survived.
            assert!(store.get(&first_id).await.is_err());
            assert!(store.get(&second_id).await.is_ok());
        });
    }

    #[test]
    fn test_list_active_filters_terminal() {
        tokio_test::block_on(async {
            let store = InMemoryTaskStore::new();
            let active = sample_task("active query");
            store.create(active).await.unwrap();

            let done = sample_task("done query");
            let done_id = done.id.clone();
            store.create(done).await.unwrap();
            store
                .update(
                    &done_id,
                    Box::new(|task| {
                        task.transition(TaskStatus::Analyzing)?;
                        task.transition(TaskStatus::TimedOut)
                    }),
                )
                .await
                .unwrap();

            let listed = store.list_active().await.unwrap();
            assert_eq!(listed.len(), 1);
            assert_ne!(listed[0].id, done_id);
        });
    }
}
