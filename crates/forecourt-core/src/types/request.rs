//! Inbound request validation
//!
//! The HTTP layer owns authentication; by the time a request reaches the
//! engine it is trusted but not yet validated for shape. Validation here is
//! pure so the engine can reject before creating any task state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Query length window, in characters, after trimming.
pub const MAX_QUERY_CHARS: usize = 2048;
/// Tenant identifiers are short opaque slugs.
pub const MAX_TENANT_CHARS: usize = 50;
pub const MAX_CONTEXT_ENTRIES: usize = 32;
pub const MAX_CONTEXT_BYTES: usize = 4096;

/// Caller timeout clamp window, milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 120_000;

/// One analytical question to route through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Clamped to [1_000, 120_000]; engine default applies when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl InsightRequest {
    pub fn new(query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tenant_id: tenant_id.into(),
            context: BTreeMap::new(),
            timeout_ms: None,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Shape validation. Returns a caller-facing detail string on failure.
    pub fn validate(&self) -> Result<(), String> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(format!("query exceeds {} characters", MAX_QUERY_CHARS));
        }

        let tenant = self.tenant_id.trim();
        if tenant.is_empty() {
            return Err("tenant_id must not be empty".to_string());
        }
        if tenant.chars().count() > MAX_TENANT_CHARS {
            return Err(format!("tenant_id exceeds {} characters", MAX_TENANT_CHARS));
        }
        if !tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err("tenant_id contains invalid characters".to_string());
        }

        if self.context.len() > MAX_CONTEXT_ENTRIES {
            return Err(format!("context exceeds {} entries", MAX_CONTEXT_ENTRIES));
        }
        let context_bytes: usize = self
            .context
            .iter()
            .map(|(k, v)| k.len() + v.to_string().len())
            .sum();
        if context_bytes > MAX_CONTEXT_BYTES {
            return Err(format!("context exceeds {} bytes", MAX_CONTEXT_BYTES));
        }
        for value in self.context.values() {
            if !(value.is_string() || value.is_number() || value.is_boolean()) {
                return Err("context values must be strings, numbers, or booleans".to_string());
            }
        }

        Ok(())
    }

    /// Effective timeout: caller value clamped to the allowed window, or
    /// the configured default.
    pub fn effective_timeout_ms(&self, default_ms: u64) -> u64 {
        match self.timeout_ms {
            Some(ms) => ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
            None => default_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_and_whitespace_queries_rejected() {
        assert!(InsightRequest::new("", "d1").validate().is_err());
        assert!(InsightRequest::new("   \t", "d1").validate().is_err());
    }

    #[test]
    fn test_query_boundary_accepted() {
        let at_limit = "q".repeat(MAX_QUERY_CHARS);
        assert!(InsightRequest::new(at_limit, "d1").validate().is_ok());
        let over = "q".repeat(MAX_QUERY_CHARS + 1);
        assert!(InsightRequest::new(over, "d1").validate().is_err());
    }

    #[test]
    fn test_tenant_charset_enforced() {
        assert!(InsightRequest::new("q", "dealer_123").validate().is_ok());
        assert!(InsightRequest::new("q", "dealer-123").validate().is_ok());
        assert!(InsightRequest::new("q", "dealer 123").validate().is_err());
        assert!(InsightRequest::new("q", "dealer;drop").validate().is_err());
    }

    #[test]
    fn test_context_bounds() {
        let mut request = InsightRequest::new("q", "d1");
        for i in 0..MAX_CONTEXT_ENTRIES {
            request = request.with_context(format!("k{i}"), json!(true));
        }
        assert!(request.validate().is_ok());
        let request = request.with_context("one_more", json!(1));
        assert!(request.validate().is_err());

        let oversized =
            InsightRequest::new("q", "d1").with_context("blob", json!("x".repeat(5000)));
        assert!(oversized.validate().is_err());

        let nested = InsightRequest::new("q", "d1").with_context("obj", json!({"a": 1}));
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_timeout_clamped() {
        let request = InsightRequest::new("q", "d1").with_timeout_ms(10);
        assert_eq!(request.effective_timeout_ms(30_000), MIN_TIMEOUT_MS);
        let request = InsightRequest::new("q", "d1").with_timeout_ms(600_000);
        assert_eq!(request.effective_timeout_ms(30_000), MAX_TIMEOUT_MS);
        let request = InsightRequest::new("q", "d1");
        assert_eq!(request.effective_timeout_ms(30_000), 30_000);
    }
}
