//! Tier 1 - the dispatcher.
//!
//! Front desk of the pipeline: classifies incoming queries with the model's
//! signals run through a fixed rule table, routes them to a specialist, and
//! formats approved drafts into the caller-visible response.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forecourt_core::agent::{AgentError, Classification};
use forecourt_core::client::{ModelClient, ModelError, ModelRequest};
use forecourt_core::types::{
    Complexity, ConfidenceLevel, Draft, InsightResponse, ResponseMetadata, SpecialistKind, Task,
    Visualization, VisualizationKind,
};

/// Data sources a specialist may read from.
const KNOWN_SOURCES: [&str; 5] = ["sales", "inventory", "customers", "service", "finance"];

const CRITICAL_SIGNALS: [&str; 7] = [
    "strategic",
    "investment",
    "invest",
    "risk",
    "compliance",
    "audit",
    "financial impact",
];

const COMPLEX_SIGNALS: [&str; 8] = [
    "forecast",
    "predict",
    "projection",
    "anomaly",
    "optimization",
    "what-if",
    "machine learning",
    "multi-year",
];

const SIMPLE_SIGNALS: [&str; 6] = [
    "current inventory",
    "today",
    "customer count",
    "units sold",
    "single metric",
    "lookup",
];

/// Classification plus any recoverable warning worth recording on the task.
#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    pub classification: Classification,
    /// Set when the model's output was malformed and defaults applied.
    pub warning: Option<String>,
}

/// Tier-1 dispatcher.
pub struct Dispatcher {
    model: Arc<dyn ModelClient>,
}

impl Dispatcher {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    /// Classify the query and choose the specialist.
    ///
    /// Fails with `ClassificationFailed` only once the model façade's
    /// retries are exhausted; malformed output degrades to `standard` with
    /// a recorded warning.
    pub async fn classify(
        &self,
        task: &Task,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<ClassifyOutcome, AgentError> {
        let prompt = classification_prompt(task);
        let request = ModelRequest::json(prompt)
            .with_cancel(cancel)
            .with_deadline(deadline);

        let signals = match self.model.generate(request).await {
            Ok(output) => match serde_json::from_str::<ClassifierSignals>(&output.text) {
                Ok(signals) => signals,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "classification malformed, defaulting to standard");
                    return Ok(ClassifyOutcome {
                        classification: fallback_classification(&task.query),
                        warning: Some(format!("classification output malformed: {e}")),
                    });
                }
            },
            Err(ModelError::Malformed(message)) => {
                warn!(task_id = %task.id, %message, "classification malformed, defaulting to standard");
                return Ok(ClassifyOutcome {
                    classification: fallback_classification(&task.query),
                    warning: Some(format!("classification output malformed: {message}")),
                });
            }
            Err(ModelError::Cancelled) => return Err(AgentError::Model(ModelError::Cancelled)),
            Err(ModelError::Unavailable(message)) => {
                return Err(AgentError::ClassificationFailed(message));
            }
        };

        let complexity = complexity_from_signals(&signals.signals, &task.query);
        let classification = Classification {
            complexity,
            required_data_sources: resolve_sources(&signals.data_sources, &task.query),
            specialist: specialist_for(complexity),
        };
        info!(
            task_id = %task.id,
            complexity = %classification.complexity,
            specialist = %classification.specialist,
            sources = ?classification.required_data_sources,
            "query classified"
        );
        Ok(ClassifyOutcome {
            classification,
            warning: None,
        })
    }

    /// Format the approved draft into the caller response.
    ///
    /// Pure over its inputs: timing comes from the task's own timestamps,
    /// so formatting twice yields equal responses.
    pub fn format(&self, task: &Task, draft: &Draft, cached: bool) -> InsightResponse {
        let quality = draft.quality_score.unwrap_or(0.0);
        let processing_time_ms = (task.updated_at - task.created_at)
            .num_milliseconds()
            .max(0) as u64;

        InsightResponse {
            summary: draft.content.summary.clone(),
            detailed: draft.content.clone(),
            confidence_level: ConfidenceLevel::from_score(quality),
            visualization: Some(choose_visualization(draft)),
            metadata: ResponseMetadata {
                task_id: task.id.clone(),
                complexity: task.complexity.unwrap_or(Complexity::Standard),
                processing_time_ms,
                revisions_used: task.revisions_used,
                cached,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierSignals {
    #[serde(default)]
    signals: Vec<String>,
    #[serde(default)]
    data_sources: Vec<String>,
}

fn classification_prompt(task: &Task) -> String {
    let mut prompt = String::new();
    prompt.push_str("Classify this automotive dealership query for analytical routing.\n\n");
    prompt.push_str(&format!("Query: {}\n", task.query));
    prompt.push_str(&format!("Dealership: {}\n", task.tenant_id));
    if !task.context.is_empty() {
        prompt.push_str(&format!(
            "Context: {}\n",
            serde_json::Value::Object(
                task.context
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            )
        ));
    }
    prompt.push_str("\nIdentify:\n");
    prompt.push_str("1. Analytical signals (forecast/predict/anomaly/strategic/comparison/aggregation/lookup)\n");
    prompt.push_str("2. Required data sources (sales/inventory/customers/service/finance)\n");
    prompt.push_str("\nRespond with ONE JSON object:\n");
    prompt.push_str(r#"{"signals": ["signal1"], "data_sources": ["source1"]}"#);
    prompt.push('\n');
    prompt
}

/// Rule table over the model's signals and the raw query. The model
/// suggests; this table decides.
fn complexity_from_signals(signals: &[String], query: &str) -> Complexity {
    let mut haystack = signals.join(" ").to_lowercase();
    haystack.push(' ');
    haystack.push_str(&query.to_lowercase());

    if CRITICAL_SIGNALS.iter().any(|s| haystack.contains(s)) {
        return Complexity::Critical;
    }
    if COMPLEX_SIGNALS.iter().any(|s| haystack.contains(s)) {
        return Complexity::Complex;
    }
    if SIMPLE_SIGNALS.iter().any(|s| haystack.contains(s)) {
        return Complexity::Simple;
    }
    Complexity::Standard
}

fn specialist_for(complexity: Complexity) -> SpecialistKind {
    if complexity.needs_senior() {
        SpecialistKind::Senior
    } else {
        SpecialistKind::Standard
    }
}

/// Keep only known sources; fall back to keyword detection over the query.
fn resolve_sources(proposed: &[String], query: &str) -> Vec<String> {
    let mut sources: Vec<String> = proposed
        .iter()
        .map(|s| s.to_lowercase())
        .filter(|s| KNOWN_SOURCES.contains(&s.as_str()))
        .collect();
    sources.dedup();

    if sources.is_empty() {
        sources = sources_from_query(query);
    }
    sources
}

fn sources_from_query(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut sources = Vec::new();

    if ["sales", "sell", "sold", "revenue"].iter().any(|w| lowered.contains(w)) {
        sources.push("sales".to_string());
    }
    if ["inventory", "stock", "vehicles", "lot"].iter().any(|w| lowered.contains(w)) {
        sources.push("inventory".to_string());
    }
    if ["customer", "client", "buyer", "lead"].iter().any(|w| lowered.contains(w)) {
        sources.push("customers".to_string());
    }
    if ["service", "maintenance", "repair"].iter().any(|w| lowered.contains(w)) {
        sources.push("service".to_string());
    }

    if sources.is_empty() {
        sources.push("sales".to_string());
    }
    sources
}

fn fallback_classification(query: &str) -> Classification {
    Classification {
        complexity: Complexity::Standard,
        required_data_sources: sources_from_query(query),
        specialist: SpecialistKind::Standard,
    }
}

/// Heuristic chart choice over the draft's narrative.
fn choose_visualization(draft: &Draft) -> Visualization {
    let blob = format!(
        "{} {}",
        draft.content.summary.to_lowercase(),
        draft.content.insights.join(" ").to_lowercase()
    );

    if blob.contains("trend") || blob.contains("forecast") || blob.contains("over time") {
        Visualization {
            kind: VisualizationKind::Line,
            config: json!({"title": "Trend Analysis", "x_axis": "Time Period", "y_axis": "Value"}),
        }
    } else if blob.contains("comparison") || blob.contains("compare") || blob.contains("versus") {
        Visualization {
            kind: VisualizationKind::Bar,
            config: json!({"title": "Comparative Analysis", "orientation": "vertical"}),
        }
    } else if blob.contains("distribution") || blob.contains("share") {
        Visualization {
            kind: VisualizationKind::Pie,
            config: json!({"title": "Distribution Analysis"}),
        }
    } else {
        Visualization {
            kind: VisualizationKind::Table,
            config: json!({"title": "Data Summary"}),
        }
    }
}
