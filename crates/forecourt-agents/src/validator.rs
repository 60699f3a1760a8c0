//! Tier 3 - the validator.
//!
//! Primary directive: distrust and verify. The model is consulted once as
//! an analytical aid for the business-logic axis; every score is then
//! assembled by deterministic code cross-checking the draft against its
//! declared warehouse reads. The gate decision follows the threshold table
//! and the minimum-axis rule.

use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forecourt_config::Thresholds;
use forecourt_core::agent::{AgentError, ValidationDecision, Verdict};
use forecourt_core::client::{ModelClient, ModelError, ModelRequest};
use forecourt_core::types::{Complexity, Draft, TaskId, ValidationScores};

/// What the validator needs to know about the task under review.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub task_id: TaskId,
    pub query: String,
    pub complexity: Complexity,
    pub revisions_used: u32,
    pub max_revisions: u32,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct AuditCounters {
    validations: u64,
    approved: u64,
    revised: u64,
    rejected: u64,
    quality_sum: f64,
}

/// Read-only audit snapshot of the validator's history.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditSummary {
    pub total_validations: u64,
    pub approved: u64,
    pub revised: u64,
    pub rejected: u64,
    pub mean_quality_score: f64,
}

/// Tier-3 quality gate.
pub struct Validator {
    model: Arc<dyn ModelClient>,
    thresholds: Thresholds,
    min_axis_score: f64,
    audit: Mutex<AuditCounters>,
}

impl Validator {
    pub fn new(model: Arc<dyn ModelClient>, thresholds: Thresholds, min_axis_score: f64) -> Self {
        Self {
            model,
            thresholds,
            min_axis_score,
            audit: Mutex::new(AuditCounters::default()),
        }
    }

    /// Score the draft on four axes and decide approve / revise / reject.
    pub async fn validate(
        &self,
        ctx: &ValidationContext,
        draft: &Draft,
    ) -> Result<Verdict, AgentError> {
        let assessment = self.assess_business_logic(ctx, draft).await?;

        let (data_accuracy, data_issues) = score_data_accuracy(draft);
        let (methodology, methodology_issues) =
            score_methodology(&ctx.query, draft);
        let (business_logic, business_issues) = score_business_logic(&assessment, draft);
        let (compliance, compliance_issues) = score_compliance(draft);

        let scores = ValidationScores {
            data_accuracy,
            methodology,
            business_logic,
            compliance,
        };
        let quality_score = scores.aggregate();
        let threshold = self.thresholds.for_complexity(ctx.complexity);
        let approvable =
            quality_score >= threshold && scores.min_axis() >= self.min_axis_score;

        let decision = if approvable {
            ValidationDecision::Approve
        } else if ctx.revisions_used >= ctx.max_revisions {
            ValidationDecision::Reject
        } else {
            ValidationDecision::Revise
        };

        let feedback = if approvable {
            Vec::new()
        } else {
            collect_feedback(
                &scores,
                threshold,
                self.min_axis_score,
                [
                    data_issues,
                    methodology_issues,
                    business_issues,
                    compliance_issues,
                ],
            )
        };

        self.record_audit(decision, quality_score);
        match decision {
            ValidationDecision::Approve => info!(
                task_id = %ctx.task_id,
                quality_score,
                threshold,
                "draft approved"
            ),
            ValidationDecision::Revise => warn!(
                task_id = %ctx.task_id,
                quality_score,
                threshold,
                issues = feedback.len(),
                "draft needs revision"
            ),
            ValidationDecision::Reject => warn!(
                task_id = %ctx.task_id,
                quality_score,
                threshold,
                revisions_used = ctx.revisions_used,
                "draft rejected at revision cap"
            ),
        }

        Ok(Verdict {
            decision,
            scores,
            quality_score,
            feedback,
        })
    }

    /// Audit counters accumulated across validations.
    pub fn audit_summary(&self) -> AuditSummary {
        let audit = self.audit.lock().expect("audit lock poisoned");
        AuditSummary {
            total_validations: audit.validations,
            approved: audit.approved,
            revised: audit.revised,
            rejected: audit.rejected,
            mean_quality_score: if audit.validations > 0 {
                audit.quality_sum / audit.validations as f64
            } else {
                0.0
            },
        }
    }

    fn record_audit(&self, decision: ValidationDecision, quality_score: f64) {
        let mut audit = self.audit.lock().expect("audit lock poisoned");
        audit.validations += 1;
        audit.quality_sum += quality_score;
        match decision {
            ValidationDecision::Approve => audit.approved += 1,
            ValidationDecision::Revise => audit.revised += 1,
            ValidationDecision::Reject => audit.rejected += 1,
        }
    }

    /// One model call for a reasonableness verdict. Degrades to a neutral
    /// assessment when the model is unreachable; the deterministic checks
    /// still gate the draft.
    async fn assess_business_logic(
        &self,
        ctx: &ValidationContext,
        draft: &Draft,
    ) -> Result<ModelAssessment, AgentError> {
        if draft.content.is_empty() {
            return Ok(ModelAssessment::neutral());
        }

        let prompt = assessment_prompt(ctx, draft);
        let request = ModelRequest::json(prompt)
            .with_cancel(ctx.cancel.clone())
            .with_deadline(ctx.deadline);

        match self.model.generate(request).await {
            Ok(output) => Ok(serde_json::from_str(&output.text).unwrap_or_else(|e| {
                warn!(task_id = %ctx.task_id, error = %e, "assessment malformed, using neutral");
                ModelAssessment::neutral()
            })),
            Err(ModelError::Cancelled) => Err(AgentError::Model(ModelError::Cancelled)),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "assessment unavailable, using neutral");
                Ok(ModelAssessment::neutral())
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ModelAssessment {
    #[serde(default = "default_reasonable")]
    is_reasonable: bool,
    #[serde(default = "default_logic_score")]
    logic_score: f64,
    #[serde(default)]
    issues: Vec<String>,
}

fn default_reasonable() -> bool {
    true
}

fn default_logic_score() -> f64 {
    0.8
}

impl ModelAssessment {
    fn neutral() -> Self {
        Self {
            is_reasonable: true,
            logic_score: 0.8,
            issues: Vec::new(),
        }
    }
}

fn assessment_prompt(ctx: &ValidationContext, draft: &Draft) -> String {
    let mut prompt = String::new();
    prompt.push_str("Evaluate the business logic of this automotive dealership insight.\n\n");
    prompt.push_str(&format!("Original query: {}\n", ctx.query));
    prompt.push_str(&format!(
        "Insight: {}\n",
        serde_json::to_string(&draft.content).unwrap_or_default()
    ));
    prompt.push_str("\nCheck for logical consistency, conclusions the data supports, and actionable recommendations.\n");
    prompt.push_str("\nRespond with ONE JSON object:\n");
    prompt.push_str(r#"{"is_reasonable": true, "logic_score": 0.0, "issues": ["..."], "strengths": ["..."]}"#);
    prompt.push('\n');
    prompt
}

/// Do the numbers reconcile with the declared reads?
fn score_data_accuracy(draft: &Draft) -> (f64, Vec<String>) {
    let mut score = 1.0;
    let mut issues = Vec::new();

    if draft.queries_executed.is_empty() {
        score *= 0.3;
        issues.push("cite the data sources the analysis relies on".to_string());
    } else {
        let total_rows: usize = draft.queries_executed.iter().map(|q| q.row_count).sum();
        if total_rows == 0 {
            score *= 0.7;
            issues.push(
                "no rows were returned; verify data availability for the requested period"
                    .to_string(),
            );
        }
        if draft.queries_executed.iter().any(|q| q.truncated) {
            score *= 0.9;
            issues.push("account for truncated result sets in the analysis".to_string());
        }
    }

    if draft.content.key_metrics.is_empty() {
        score *= 0.8;
        issues.push("include the key metrics the summary relies on".to_string());
    }

    let mut implausible = false;
    let mut unsourced = false;
    for (name, value) in &draft.content.key_metrics {
        if !value.is_finite() || value.abs() > 1e12 {
            if !implausible {
                score *= 0.5;
                implausible = true;
            }
            issues.push(format!("metric {name} is implausible"));
        }
        if let Some((prefix, _)) = name.split_once('.') {
            let declared = draft.queries_executed.iter().any(|q| q.source == prefix);
            if !declared && !unsourced {
                score *= 0.6;
                unsourced = true;
                issues.push(format!("cite a data source for metric {name}"));
            }
        }
    }

    (score, issues)
}

/// Are the analytical steps appropriate to the question?
fn score_methodology(query: &str, draft: &Draft) -> (f64, Vec<String>) {
    let mut score = 1.0;
    let mut issues = Vec::new();

    let query = query.to_lowercase();
    let blob = narrative_blob(draft);

    if contains_any(&query, &["forecast", "predict", "projection"]) {
        let has_horizon = contains_any(
            &blob,
            &["horizon", "next quarter", "next month", "next year", "next 3 months"],
        );
        if !has_horizon {
            score *= 0.6;
            issues.push("state the forecast horizon".to_string());
        }
        let has_method = contains_any(
            &blob,
            &[
                "regression",
                "time series",
                "moving average",
                "seasonal",
                "trend model",
                "exponential smoothing",
            ],
        );
        if !has_method {
            score *= 0.85;
            issues.push("state the forecasting method".to_string());
        }
    }

    if contains_any(&query, &["compare", "comparison", "versus", " vs "]) {
        let has_window = contains_any(
            &blob,
            &["prior", "previous", "period", "year-over-year", "month-over-month"],
        );
        if !has_window {
            score *= 0.8;
            issues.push("include prior-period comparison over matching time windows".to_string());
        }
    }

    if contains_any(&query, &["top ", "rank", "best", "highest", "lowest"]) {
        let has_key = contains_any(
            &blob,
            &["by units", "by revenue", "by volume", "ranked by", "ordered by"],
        );
        if !has_key {
            score *= 0.85;
            issues.push("state the ranking key".to_string());
        }
    }

    if draft.self_confidence < 0.7 {
        score *= 0.85;
        issues.push("strengthen the analysis; specialist confidence is low".to_string());
    }

    (score, issues)
}

/// Do insights and recommendations follow from the metrics?
fn score_business_logic(assessment: &ModelAssessment, draft: &Draft) -> (f64, Vec<String>) {
    let mut score = assessment.logic_score.clamp(0.0, 1.0);
    let mut issues = Vec::new();

    if !assessment.is_reasonable {
        score *= 0.7;
        issues.extend(assessment.issues.iter().take(3).cloned());
    }

    if draft.content.recommendations.is_empty() {
        score *= 0.7;
        issues.push("add actionable recommendations with priorities".to_string());
    } else if draft
        .content
        .recommendations
        .iter()
        .any(|r| r.action.trim().is_empty())
    {
        score *= 0.85;
        issues.push("give each recommendation a concrete action".to_string());
    }

    (score, issues)
}

/// No PII leaks, no out-of-scope advice, no prompt echoes.
fn score_compliance(draft: &Draft) -> (f64, Vec<String>) {
    let blob = narrative_blob(draft);

    if pii_patterns().iter().any(|p| p.is_match(&blob)) {
        return (
            0.0,
            vec!["remove personally identifying fields".to_string()],
        );
    }

    let mut score = 1.0;
    let mut issues = Vec::new();

    if contains_any(&blob, &["as an ai", "system prompt", "cannot assist"]) {
        score *= 0.7;
        issues.push("remove model-instruction echoes".to_string());
    }
    if contains_any(
        &blob,
        &["stock market", "cryptocurrency", "medical advice", "legal advice"],
    ) {
        score *= 0.8;
        issues.push("keep recommendations within dealership operations".to_string());
    }

    (score, issues)
}

fn collect_feedback(
    scores: &ValidationScores,
    threshold: f64,
    min_axis: f64,
    issues_per_axis: [Vec<String>; 4],
) -> Vec<String> {
    let mut feedback = Vec::new();
    for ((axis, value), issues) in scores.axes().iter().zip(issues_per_axis) {
        if *value >= threshold && *value >= min_axis {
            continue;
        }
        if issues.is_empty() {
            feedback.push(format!("improve {axis}"));
        } else {
            feedback.extend(issues);
        }
    }
    feedback
}

fn narrative_blob(draft: &Draft) -> String {
    let content = &draft.content;
    let mut blob = String::new();
    blob.push_str(&content.summary);
    for text in content
        .insights
        .iter()
        .chain(content.changes.iter())
        .chain(content.recommendations.iter().map(|r| &r.action))
    {
        blob.push(' ');
        blob.push_str(text);
    }
    blob.to_lowercase()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// PII shapes screened out of caller-visible content. Phone numbers
/// require separators so large plain metrics do not trip the screen.
fn pii_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"),
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("email pattern"),
            Regex::new(r"\b\d{3}[-.]\d{3}[-.]\d{4}\b").expect("phone pattern"),
        ]
    })
}
