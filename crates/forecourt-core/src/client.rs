//! Collaborator client abstractions
//!
//! The pipeline consumes a generative model and a read-only warehouse
//! through these traits. Façade implementations in forecourt-clients own
//! retries, deadlines, caps, and cancellation; callers here see typed
//! results only.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Model call errors, surfaced only after the façade's retries exhaust.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// A JSON response was requested and none could be extracted.
    #[error("model response malformed: {0}")]
    Malformed(String),

    #[error("model call cancelled")]
    Cancelled,
}

/// One text-in/text-out model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    /// Request strict JSON; the façade extracts the first balanced object.
    pub want_json: bool,
    /// Cooperative cancellation, cancelled by the engine on task deadline.
    pub cancel: CancellationToken,
    /// Absolute cap no later than the owning task's deadline.
    pub deadline: Option<Instant>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            want_json: false,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            want_json: true,
            ..Self::new(prompt)
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Successful model output.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub text: String,
    /// Whether any transport retry was needed; feeds specialist confidence.
    pub retried: bool,
}

/// Generative model client: retrying, deadline-capped, cancellation-aware.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<ModelOutput, ModelError>;
}

/// Warehouse call errors.
#[derive(Debug, Clone, Error)]
pub enum WarehouseError {
    #[error("warehouse unavailable: {0}")]
    Unavailable(String),

    /// Template rejected: not structurally read-only, or bare interpolation.
    #[error("query invalid: {0}")]
    QueryInvalid(String),

    #[error("query timed out")]
    QueryTimeout,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("warehouse call cancelled")]
    Cancelled,
}

/// One parameterised read-only query.
#[derive(Debug, Clone)]
pub struct WarehouseRequest {
    /// Read-only statement with `@name` placeholders only.
    pub template: String,
    pub params: BTreeMap<String, Value>,
    pub row_limit: usize,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl WarehouseRequest {
    pub fn new(template: impl Into<String>, row_limit: usize) -> Self {
        Self {
            template: template.into(),
            params: BTreeMap::new(),
            row_limit,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Rows returned from a warehouse read. `truncated` is set when a row or
/// byte cap cut the result short.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub rows: Vec<Value>,
    pub truncated: bool,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read-only dealership warehouse client.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn run(&self, request: WarehouseRequest) -> Result<RowSet, WarehouseError>;
}
