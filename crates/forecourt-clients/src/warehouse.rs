//! Warehouse client façade.
//!
//! Guards every read: templates must be structurally read-only with
//! `@name` placeholders only, calls are deadline-capped, and results are
//! cut to row/byte caps with an explicit truncation marker.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use forecourt_core::client::{RowSet, WarehouseClient, WarehouseError, WarehouseRequest};

/// Keywords that mark a template as not read-only.
const FORBIDDEN_KEYWORDS: [&str; 12] = [
    "insert", "update", "delete", "drop", "create", "alter", "truncate", "merge", "grant",
    "revoke", "exec", "call",
];

/// Raw warehouse transport behind the façade. Receives the full request so
/// backends can honour the cancellation token themselves.
#[async_trait]
pub trait WarehouseBackend: Send + Sync {
    async fn query(&self, request: &WarehouseRequest) -> Result<Vec<Value>, WarehouseError>;
}

#[async_trait]
impl<B: WarehouseBackend + ?Sized> WarehouseBackend for Arc<B> {
    async fn query(&self, request: &WarehouseRequest) -> Result<Vec<Value>, WarehouseError> {
        (**self).query(request).await
    }
}

/// Façade caps and timeouts.
#[derive(Debug, Clone)]
pub struct WarehouseFacadeConfig {
    pub call_timeout: Duration,
    /// Upper bound applied on top of any per-request row limit.
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl Default for WarehouseFacadeConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(15_000),
            max_rows: 1_000,
            max_bytes: 256 * 1024,
        }
    }
}

/// Validating, deadline-capped warehouse client.
pub struct WarehouseFacade<B: WarehouseBackend> {
    backend: B,
    config: WarehouseFacadeConfig,
}

impl<B: WarehouseBackend> WarehouseFacade<B> {
    pub fn new(backend: B, config: WarehouseFacadeConfig) -> Self {
        Self { backend, config }
    }

    fn call_budget(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => self
                .config
                .call_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.config.call_timeout,
        }
    }

    fn apply_caps(&self, mut rows: Vec<Value>, row_limit: usize) -> RowSet {
        let row_cap = row_limit.min(self.config.max_rows).max(1);
        let mut truncated = false;

        if rows.len() > row_cap {
            rows.truncate(row_cap);
            truncated = true;
        }

        let mut kept = Vec::with_capacity(rows.len());
        let mut bytes = 0usize;
        for row in rows {
            bytes += row.to_string().len();
            if bytes > self.config.max_bytes {
                truncated = true;
                break;
            }
            kept.push(row);
        }

        RowSet {
            rows: kept,
            truncated,
        }
    }
}

#[async_trait]
impl<B: WarehouseBackend> WarehouseClient for WarehouseFacade<B> {
    async fn run(&self, request: WarehouseRequest) -> Result<RowSet, WarehouseError> {
        validate_template(&request.template, &request.params)?;

        if request.cancel.is_cancelled() {
            return Err(WarehouseError::Cancelled);
        }
        let budget = self.call_budget(request.deadline);
        if budget.is_zero() {
            return Err(WarehouseError::QueryTimeout);
        }

        // The backend holds the request's cancellation token and is expected
        // to honour it; the timeout covers non-cooperative backends.
        let rows = match tokio::time::timeout(budget, self.backend.query(&request)).await {
            Ok(result) => result?,
            Err(_) => return Err(WarehouseError::QueryTimeout),
        };

        let row_set = self.apply_caps(rows, request.row_limit);
        debug!(
            rows = row_set.rows.len(),
            truncated = row_set.truncated,
            "warehouse read completed"
        );
        Ok(row_set)
    }
}

/// Structural validation: single read-only statement, placeholders only,
/// every placeholder bound.
pub fn validate_template(
    template: &str,
    params: &BTreeMap<String, Value>,
) -> Result<(), WarehouseError> {
    let trimmed = template.trim();
    if trimmed.is_empty() {
        return Err(WarehouseError::QueryInvalid(
            "empty template".to_string(),
        ));
    }

    let lowered = trimmed.to_lowercase();
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(WarehouseError::QueryInvalid(
            "template must be a SELECT statement".to_string(),
        ));
    }
    if trimmed.contains(';') {
        return Err(WarehouseError::QueryInvalid(
            "multiple statements are not allowed".to_string(),
        ));
    }
    for keyword in FORBIDDEN_KEYWORDS {
        if lowered
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|word| word == keyword)
        {
            return Err(WarehouseError::QueryInvalid(format!(
                "mutating keyword not allowed: {keyword}"
            )));
        }
    }
    // Bare interpolation of values defeats parameterisation.
    for marker in ["'", "\"", "${", "{}", "%s"] {
        if trimmed.contains(marker) {
            return Err(WarehouseError::QueryInvalid(format!(
                "bare interpolation marker `{marker}`; use @name placeholders"
            )));
        }
    }

    for placeholder in placeholders(trimmed) {
        if !params.contains_key(&placeholder) {
            return Err(WarehouseError::QueryInvalid(format!(
                "unbound placeholder @{placeholder}"
            )));
        }
    }

    Ok(())
}

fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    for (idx, ch) in template.char_indices() {
        if ch != '@' {
            continue;
        }
        let rest: String = template[idx + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !rest.is_empty() && !names.contains(&rest) {
            names.push(rest);
        }
    }
    names
}

/// Deterministic backend for tests and demos: canned dealership tables,
/// injectable failures, and an optional cancellation-aware delay.
#[derive(Default)]
pub struct MockWarehouseBackend {
    tables: Mutex<BTreeMap<String, Vec<Value>>>,
    failure: Mutex<Option<WarehouseError>>,
    failing_sources: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
    cancelled: Arc<AtomicBool>,
}

/// Flags the shared bool when a query future is dropped before finishing,
/// which is how async cancellation reaches the backend.
struct CancelObserver {
    finished: bool,
    flag: Arc<AtomicBool>,
}

impl Drop for CancelObserver {
    fn drop(&mut self) {
        if !self.finished {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

impl MockWarehouseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-loaded with sample sales/inventory/customers/service rows.
    pub fn with_sample_data() -> Self {
        let backend = Self::new();
        backend.load_table(
            "sales",
            vec![
                json!({"vehicle_make": "Toyota", "vehicle_model": "Camry", "units_sold": 15, "total_revenue": 450_000.0}),
                json!({"vehicle_make": "Honda", "vehicle_model": "Accord", "units_sold": 12, "total_revenue": 384_000.0}),
                json!({"vehicle_make": "Ford", "vehicle_model": "F-150", "units_sold": 10, "total_revenue": 500_000.0}),
            ],
        );
        backend.load_table(
            "inventory",
            vec![
                json!({"vehicle_make": "Toyota", "vehicle_model": "RAV4", "inventory_count": 34, "avg_days_on_lot": 21}),
                json!({"vehicle_make": "Honda", "vehicle_model": "CR-V", "inventory_count": 27, "avg_days_on_lot": 18}),
            ],
        );
        backend.load_table(
            "customers",
            vec![
                json!({"lead_source": "web", "lead_count": 120, "conversions": 18}),
                json!({"lead_source": "walk_in", "lead_count": 45, "conversions": 12}),
            ],
        );
        backend.load_table(
            "service",
            vec![json!({"service_type": "maintenance", "jobs": 210, "revenue": 63_000.0})],
        );
        backend
    }

    pub fn load_table(&self, source: impl Into<String>, rows: Vec<Value>) {
        self.tables.lock().expect("mock lock").insert(source.into(), rows);
    }

    /// Every subsequent query fails with `error`.
    pub fn fail_with(&self, error: WarehouseError) {
        *self.failure.lock().expect("mock lock") = Some(error);
    }

    /// Queries against `source` alone fail as unavailable.
    pub fn fail_source(&self, source: impl Into<String>) {
        self.failing_sources
            .lock()
            .expect("mock lock")
            .push(source.into());
    }

    /// Sleep before answering; aborts early when the request is cancelled.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().expect("mock lock") = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether any query observed a cancellation signal.
    pub fn saw_cancellation(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn table_for(&self, template: &str) -> Vec<Value> {
        let lowered = template.to_lowercase();
        let tables = self.tables.lock().expect("mock lock");
        let mut after_from = lowered.split(" from ").skip(1);
        if let Some(rest) = after_from.next() {
            if let Some(name) = rest.split_whitespace().next() {
                if let Some(rows) = tables.get(name) {
                    return rows.clone();
                }
            }
        }
        Vec::new()
    }
}

#[async_trait]
impl WarehouseBackend for MockWarehouseBackend {
    async fn query(&self, request: &WarehouseRequest) -> Result<Vec<Value>, WarehouseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut observer = CancelObserver {
            finished: false,
            flag: self.cancelled.clone(),
        };

        let delay = *self.delay.lock().expect("mock lock");
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = request.cancel.cancelled() => {
                    return Err(WarehouseError::Cancelled);
                }
            }
        }
        observer.finished = true;

        if let Some(error) = self.failure.lock().expect("mock lock").clone() {
            return Err(error);
        }

        let lowered = request.template.to_lowercase();
        let failing = self.failing_sources.lock().expect("mock lock").clone();
        for source in failing {
            if lowered.contains(&format!(" from {source}")) {
                return Err(WarehouseError::Unavailable(format!(
                    "source {source} offline"
                )));
            }
        }

        Ok(self.table_for(&request.template))
    }
}
