//! LifecycleBus - realtime fan-out of task state transitions.
//!
//! The engine publishes every transition here so monitoring and audit
//! consumers can follow task lifecycles without polling the store.

use async_trait::async_trait;
use tokio::sync::broadcast;

use forecourt_core::store::StoreError;
use forecourt_core::types::TaskLifecycleEvent;

/// Async publish/subscribe interface for lifecycle events.
#[async_trait]
pub trait LifecycleBus: Send + Sync {
    /// Publish an event to all active subscribers.
    async fn publish(&self, event: TaskLifecycleEvent) -> Result<(), StoreError>;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<TaskLifecycleEvent>;
}

/// In-process bus based on tokio broadcast channels.
pub struct BroadcastLifecycleBus {
    tx: broadcast::Sender<TaskLifecycleEvent>,
}

impl BroadcastLifecycleBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for BroadcastLifecycleBus {
    fn default() -> Self {
        // Enough headroom for local monitoring consumers.
        Self::new(1024)
    }
}

#[async_trait]
impl LifecycleBus for BroadcastLifecycleBus {
    async fn publish(&self, event: TaskLifecycleEvent) -> Result<(), StoreError> {
        // No receiver is not an error; the task store remains source-of-truth.
        match self.tx.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskLifecycleEvent> {
        self.tx.subscribe()
    }
}
