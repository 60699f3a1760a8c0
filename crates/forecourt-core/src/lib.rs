//! # Forecourt Core
//!
//! Core abstractions and deterministic logic for the Forecourt insight
//! pipeline.
//!
//! This crate contains:
//! - Task / Draft / Complexity / response definitions
//! - TaskStore / ModelClient / WarehouseClient / Specialist abstractions
//! - Fingerprinting for cache keys and request coalescing
//!
//! This crate does NOT care about:
//! - How tasks are stored (implementations live in forecourt-stores)
//! - Which model or warehouse backs the client traits
//! - How multiple queries are scheduled against each other

pub mod agent;
pub mod client;
pub mod fingerprint;
pub mod store;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::agent::{
        AgentError, Classification, DraftContext, Specialist, ValidationDecision, Verdict,
    };
    pub use crate::client::{
        ModelClient, ModelError, ModelOutput, ModelRequest, RowSet, WarehouseClient,
        WarehouseError, WarehouseRequest,
    };
    pub use crate::fingerprint::Fingerprint;
    pub use crate::store::{StoreError, TaskStore};
    pub use crate::types::{
        Complexity, ConfidenceLevel, Draft, DraftContent, FlowFailure, InsightRequest,
        InsightResponse, Priority, QueryRecord, Recommendation, ResponseMetadata, SpecialistKind,
        Task, TaskError, TaskId, TaskLifecycleEvent, TaskStatus, ValidationScores, Visualization,
        VisualizationKind,
    };
}

// Re-export key types at crate root
pub use agent::{AgentError, Classification, DraftContext, Specialist, ValidationDecision, Verdict};
pub use client::{
    ModelClient, ModelError, ModelOutput, ModelRequest, RowSet, WarehouseClient, WarehouseError,
    WarehouseRequest,
};
pub use fingerprint::Fingerprint;
pub use store::{StoreError, TaskStore};
pub use types::{
    Complexity, ConfidenceLevel, Draft, DraftContent, FlowFailure, InsightRequest, InsightResponse,
    SpecialistKind, Task, TaskId, TaskLifecycleEvent, TaskStatus,
};
