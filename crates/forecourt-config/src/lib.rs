//! # Forecourt Config
//!
//! Flow engine configuration: every tunable is explicit, constructed at
//! startup, and threaded into the engine. No module-level state. Configs
//! load from YAML or are built programmatically; `validate` rejects
//! out-of-range tunables before the engine sees them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use forecourt_core::types::Complexity;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Minimum quality score per complexity class for approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub simple: f64,
    pub standard: f64,
    pub complex: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            simple: 0.80,
            standard: 0.85,
            complex: 0.90,
            critical: 0.95,
        }
    }
}

impl Thresholds {
    pub fn for_complexity(&self, complexity: Complexity) -> f64 {
        match complexity {
            Complexity::Simple => self.simple,
            Complexity::Standard => self.standard,
            Complexity::Complex => self.complex,
            Complexity::Critical => self.critical,
        }
    }
}

/// Retry backoff shape for model transport retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryBackoffSettings {
    pub floor_ms: u64,
    pub ceiling_ms: u64,
    pub jitter: f64,
    pub multiplier: f64,
}

impl Default for RetryBackoffSettings {
    fn default() -> Self {
        Self {
            floor_ms: 250,
            ceiling_ms: 4_000,
            jitter: 0.25,
            multiplier: 2.0,
        }
    }
}

/// Flow engine configuration. All fields are tunable at startup; defaults
/// match the documented contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Revision cycles allowed before a revise decision becomes a reject
    pub max_revisions: u32,
    /// Overall per-query deadline
    pub query_timeout_ms: u64,
    /// Wall-clock cap per model call, retries included
    pub model_call_timeout_ms: u64,
    /// Wall-clock cap per warehouse call
    pub warehouse_call_timeout_ms: u64,
    /// In-flight task cap; arrivals beyond it are rejected as overloaded
    pub max_active_tasks: usize,
    pub cache_capacity: usize,
    pub cache_ttl_ms: u64,
    /// Rows beyond this count are summarised as aggregates in prompts
    pub max_rows_in_prompt: usize,
    /// Row cap per warehouse read
    pub warehouse_row_limit: usize,
    /// Minimum per-axis validation score for approval
    pub min_axis_score: f64,
    pub thresholds: Thresholds,
    /// Model call attempts, first call included
    pub model_retry_attempts: u32,
    pub retry_backoff: RetryBackoffSettings,
    /// Context keys that participate in cache fingerprinting
    pub cache_context_keys: Vec<String>,
    /// Suggested wait for callers rejected with overloaded
    pub overload_retry_after_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_revisions: 2,
            query_timeout_ms: 30_000,
            model_call_timeout_ms: 12_000,
            warehouse_call_timeout_ms: 15_000,
            max_active_tasks: 256,
            cache_capacity: 1024,
            cache_ttl_ms: 3_600_000,
            max_rows_in_prompt: 200,
            warehouse_row_limit: 1_000,
            min_axis_score: 0.60,
            thresholds: Thresholds::default(),
            model_retry_attempts: 3,
            retry_backoff: RetryBackoffSettings::default(),
            cache_context_keys: Vec::new(),
            overload_retry_after_ms: 1_000,
        }
    }
}

impl FlowConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn model_call_timeout(&self) -> Duration {
        Duration::from_millis(self.model_call_timeout_ms)
    }

    pub fn warehouse_call_timeout(&self) -> Duration {
        Duration::from_millis(self.warehouse_call_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Reject tunables the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_timeout_ms == 0
            || self.model_call_timeout_ms == 0
            || self.warehouse_call_timeout_ms == 0
        {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_active_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_active_tasks must be greater than zero".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_rows_in_prompt == 0 || self.warehouse_row_limit == 0 {
            return Err(ConfigError::Invalid(
                "row limits must be greater than zero".to_string(),
            ));
        }
        if self.max_revisions > 10 {
            return Err(ConfigError::Invalid(
                "max_revisions must be at most 10".to_string(),
            ));
        }
        if self.model_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "model_retry_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_axis_score) {
            return Err(ConfigError::Invalid(
                "min_axis_score must be within [0, 1]".to_string(),
            ));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("simple", t.simple),
            ("standard", t.standard),
            ("complex", t.complex),
            ("critical", t.critical),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "thresholds.{name} must be within [0, 1]"
                )));
            }
        }
        if t.simple > t.standard || t.standard > t.complex || t.complex > t.critical {
            return Err(ConfigError::Invalid(
                "thresholds must be non-decreasing in complexity".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry_backoff.jitter) {
            return Err(ConfigError::Invalid(
                "retry_backoff.jitter must be within [0, 1]".to_string(),
            ));
        }
        if self.retry_backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry_backoff.multiplier must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load and validate configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<FlowConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: FlowConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_revisions, 2);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert!((config.thresholds.critical - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: FlowConfig = serde_yaml::from_str(
            r#"
max_revisions: 1
thresholds:
  simple: 0.75
  standard: 0.80
  complex: 0.90
  critical: 0.95
"#,
        )
        .unwrap();
        assert_eq!(config.max_revisions, 1);
        assert!((config.thresholds.simple - 0.75).abs() < 1e-9);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_active_tasks, 256);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = FlowConfig {
            query_timeout_ms: 0,
            ..FlowConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let config = FlowConfig {
            thresholds: Thresholds {
                simple: 0.95,
                standard: 0.85,
                complex: 0.90,
                critical: 0.95,
            },
            ..FlowConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_threshold_lookup_by_complexity() {
        let thresholds = Thresholds::default();
        assert!((thresholds.for_complexity(Complexity::Simple) - 0.80).abs() < 1e-9);
        assert!((thresholds.for_complexity(Complexity::Critical) - 0.95).abs() < 1e-9);
    }
}
