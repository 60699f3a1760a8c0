//! # Forecourt Stores
//!
//! Process-local store implementations for the Forecourt pipeline.
//!
//! This crate provides:
//! - InMemory TaskStore with per-task exclusion
//! - LRU/TTL InsightCache for approved responses
//! - In-process LifecycleBus for monitoring/audit subscribers

mod cache;
mod lifecycle;
mod task_store;

pub use cache::InsightCache;
pub use lifecycle::{BroadcastLifecycleBus, LifecycleBus};
pub use task_store::InMemoryTaskStore;

// Re-export core traits for convenience
pub use forecourt_core::store::{StoreError, TaskStore};
