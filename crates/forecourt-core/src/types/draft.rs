//! Draft type definitions
//!
//! A Draft is one specialist output under consideration by the validator.
//! Specialists create drafts; validation scores are written by the
//! validator only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The two Tier-2 variants, selected by complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    Standard,
    Senior,
}

impl SpecialistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistKind::Standard => "standard",
            SpecialistKind::Senior => "senior",
        }
    }
}

impl std::fmt::Display for SpecialistKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommendation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// One recommended action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub action: String,
}

/// Structured draft payload, matching the JSON shape specialists request
/// from the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftContent {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    /// On revision: what changed in response to each feedback item
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
}

impl DraftContent {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
            && self.key_metrics.is_empty()
            && self.insights.is_empty()
            && self.recommendations.is_empty()
    }
}

/// Description of one warehouse read performed for a draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Logical data source, e.g. `sales`, `inventory`
    pub source: String,
    /// The parameterised template that was executed
    pub template: String,
    pub row_count: usize,
    pub truncated: bool,
}

/// Per-axis validation scores, each in [0, 1]. Written by the validator only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationScores {
    pub data_accuracy: f64,
    pub methodology: f64,
    pub business_logic: f64,
    pub compliance: f64,
}

impl ValidationScores {
    /// Weighted aggregate used for the gate decision.
    pub fn aggregate(&self) -> f64 {
        0.35 * self.data_accuracy
            + 0.25 * self.methodology
            + 0.25 * self.business_logic
            + 0.15 * self.compliance
    }

    /// The weakest axis, compared against the minimum-axis rule.
    pub fn min_axis(&self) -> f64 {
        self.data_accuracy
            .min(self.methodology)
            .min(self.business_logic)
            .min(self.compliance)
    }

    /// Axis name/value pairs, for feedback generation and logs.
    pub fn axes(&self) -> [(&'static str, f64); 4] {
        [
            ("data_accuracy", self.data_accuracy),
            ("methodology", self.methodology),
            ("business_logic", self.business_logic),
            ("compliance", self.compliance),
        ]
    }
}

/// Draft - one specialist output under consideration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub author: SpecialistKind,
    pub content: DraftContent,
    pub queries_executed: Vec<QueryRecord>,
    /// Specialist's own confidence in [0, 1]
    pub self_confidence: f64,
    /// Populated by the validator
    #[serde(default)]
    pub validation: Option<ValidationScores>,
    /// Weighted aggregate, populated by the validator
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// Issues raised when the draft did not pass
    #[serde(default)]
    pub feedback: Vec<String>,
}

impl Draft {
    /// Create a draft with content and executed reads.
    pub fn new(
        author: SpecialistKind,
        content: DraftContent,
        queries_executed: Vec<QueryRecord>,
        self_confidence: f64,
    ) -> Self {
        Self {
            author,
            content,
            queries_executed,
            self_confidence: self_confidence.clamp(0.0, 1.0),
            validation: None,
            quality_score: None,
            feedback: Vec::new(),
        }
    }

    /// An empty draft, emitted when the warehouse was unreachable so the
    /// validator can reject with context rather than the task crashing.
    pub fn empty(author: SpecialistKind) -> Self {
        Self::new(author, DraftContent::default(), Vec::new(), 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_uses_gate_weights() {
        let scores = ValidationScores {
            data_accuracy: 1.0,
            methodology: 0.8,
            business_logic: 0.6,
            compliance: 0.4,
        };
        let expected = 0.35 + 0.25 * 0.8 + 0.25 * 0.6 + 0.15 * 0.4;
        assert!((scores.aggregate() - expected).abs() < 1e-9);
        assert!((scores.min_axis() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_self_confidence_clamped() {
        let draft = Draft::new(
            SpecialistKind::Senior,
            DraftContent::default(),
            Vec::new(),
            1.7,
        );
        assert!((draft.self_confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_content_parses_leniently() {
        let content: DraftContent = serde_json::from_str(
            r#"{"summary":"45 units sold","key_metrics":{"units_sold":45.0}}"#,
        )
        .unwrap();
        assert_eq!(content.summary, "45 units sold");
        assert!(content.insights.is_empty());
        assert!(!content.is_empty());
    }
}
