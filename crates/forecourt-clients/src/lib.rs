//! # Forecourt Clients
//!
//! Façades over the two external collaborators the pipeline consumes:
//!
//! - Model: bounded retries with jittered backoff, per-call deadlines,
//!   cancellation, and balanced-JSON extraction from prose-y output
//! - Warehouse: structural read-only template validation, row/byte caps,
//!   per-call timeouts
//!
//! Transports behind the façades are swappable; an OpenAI-compatible HTTP
//! transport and deterministic mocks ship here.

mod backoff;
mod model;
mod warehouse;

pub use backoff::{BackoffConfig, BackoffState};
pub use model::{
    extract_json, HttpModelTransport, HttpModelTransportConfig, MockModelTransport, ModelFacade,
    ModelFacadeConfig, ModelTransport, TransportError,
};
pub use warehouse::{
    MockWarehouseBackend, WarehouseBackend, WarehouseFacade, WarehouseFacadeConfig,
};

// Re-export core client traits for convenience
pub use forecourt_core::client::{
    ModelClient, ModelError, ModelOutput, ModelRequest, RowSet, WarehouseClient, WarehouseError,
    WarehouseRequest,
};
