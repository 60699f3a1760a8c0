//! Tier 2 - the specialists.
//!
//! Both variants follow the same procedure: plan warehouse reads from the
//! classified data sources, execute them, build an analysis prompt bounded
//! by the row budget, and parse the model's JSON draft. They differ in
//! prompt emphasis: the standard specialist covers aggregation, trends,
//! and ranking; the senior adds forecasts, anomaly callouts, and
//! multi-axis comparisons.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use forecourt_core::agent::{AgentError, DraftContext, Specialist};
use forecourt_core::client::{
    ModelClient, ModelError, ModelRequest, RowSet, WarehouseClient, WarehouseError,
    WarehouseRequest,
};
use forecourt_core::types::{
    Draft, DraftContent, Priority, QueryRecord, Recommendation, SpecialistKind,
};

/// At most this many data sources are read per draft.
pub const MAX_SOURCES_PER_DRAFT: usize = 3;

/// Tier-2 variant for simple and standard queries.
pub struct StandardSpecialist {
    model: Arc<dyn ModelClient>,
    warehouse: Arc<dyn WarehouseClient>,
}

impl StandardSpecialist {
    pub fn new(model: Arc<dyn ModelClient>, warehouse: Arc<dyn WarehouseClient>) -> Self {
        Self { model, warehouse }
    }
}

#[async_trait]
impl Specialist for StandardSpecialist {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Standard
    }

    async fn draft(&self, ctx: &DraftContext) -> Result<Draft, AgentError> {
        draft_with(
            self.kind(),
            &self.model,
            &self.warehouse,
            ctx,
            standard_prompt,
        )
        .await
    }
}

/// Tier-2 variant for complex and critical queries.
pub struct SeniorSpecialist {
    model: Arc<dyn ModelClient>,
    warehouse: Arc<dyn WarehouseClient>,
}

impl SeniorSpecialist {
    pub fn new(model: Arc<dyn ModelClient>, warehouse: Arc<dyn WarehouseClient>) -> Self {
        Self { model, warehouse }
    }
}

#[async_trait]
impl Specialist for SeniorSpecialist {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Senior
    }

    async fn draft(&self, ctx: &DraftContext) -> Result<Draft, AgentError> {
        draft_with(
            self.kind(),
            &self.model,
            &self.warehouse,
            ctx,
            senior_prompt,
        )
        .await
    }
}

struct ReadOutcome {
    records: Vec<QueryRecord>,
    sections: Vec<(String, RowSet)>,
    /// Planned reads that failed outright
    missing: usize,
    any_truncated: bool,
}

async fn draft_with(
    kind: SpecialistKind,
    model: &Arc<dyn ModelClient>,
    warehouse: &Arc<dyn WarehouseClient>,
    ctx: &DraftContext,
    build_prompt: fn(&DraftContext, &str) -> String,
) -> Result<Draft, AgentError> {
    let reads = execute_reads(warehouse, ctx).await?;

    if reads.records.is_empty() && !ctx.required_data_sources.is_empty() {
        // No data at all: emit an empty draft so the validator rejects with
        // context instead of the task crashing.
        warn!(task_id = %ctx.task_id, "no warehouse reads succeeded, emitting empty draft");
        return Ok(Draft::empty(kind));
    }

    let data_section = render_data_section(&reads.sections, ctx.max_rows_in_prompt);
    let prompt = build_prompt(ctx, &data_section);
    let request = ModelRequest::json(prompt)
        .with_cancel(ctx.cancel.clone())
        .with_deadline(ctx.deadline);

    let (content, retried, parse_fallback) = match model.generate(request).await {
        Ok(output) => match serde_json::from_str::<DraftContent>(&output.text) {
            Ok(content) => (content, output.retried, false),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "draft JSON did not match schema");
                (fallback_content(), output.retried, true)
            }
        },
        Err(ModelError::Malformed(message)) => {
            warn!(task_id = %ctx.task_id, %message, "model output held no JSON");
            (fallback_content(), false, true)
        }
        Err(ModelError::Cancelled) => return Err(AgentError::Model(ModelError::Cancelled)),
        Err(ModelError::Unavailable(message)) => {
            return Err(AgentError::SpecialistFailed(message));
        }
    };

    let planned = ctx.required_data_sources.len().min(MAX_SOURCES_PER_DRAFT);
    let missing = reads.missing + planned.saturating_sub(reads.records.len() + reads.missing);
    let mut confidence = compute_confidence(missing, reads.any_truncated, retried);
    if parse_fallback {
        confidence = confidence.min(0.3);
    }

    info!(
        task_id = %ctx.task_id,
        specialist = %kind,
        reads = reads.records.len(),
        missing,
        confidence,
        revision = !ctx.revision_feedback.is_empty(),
        "draft produced"
    );

    Ok(Draft::new(kind, content, reads.records, confidence))
}

async fn execute_reads(
    warehouse: &Arc<dyn WarehouseClient>,
    ctx: &DraftContext,
) -> Result<ReadOutcome, AgentError> {
    let mut outcome = ReadOutcome {
        records: Vec::new(),
        sections: Vec::new(),
        missing: 0,
        any_truncated: false,
    };

    for source in ctx.required_data_sources.iter().take(MAX_SOURCES_PER_DRAFT) {
        let template = read_template(source);
        let request = WarehouseRequest::new(template.clone(), ctx.row_limit)
            .with_param("tenant_id", json!(ctx.tenant_id))
            .with_cancel(ctx.cancel.clone())
            .with_deadline(ctx.deadline);

        match warehouse.run(request).await {
            Ok(rows) => {
                outcome.any_truncated |= rows.truncated;
                outcome.records.push(QueryRecord {
                    source: source.clone(),
                    template,
                    row_count: rows.len(),
                    truncated: rows.truncated,
                });
                outcome.sections.push((source.clone(), rows));
            }
            Err(WarehouseError::Cancelled) => {
                return Err(AgentError::Warehouse(WarehouseError::Cancelled));
            }
            Err(e) => {
                warn!(task_id = %ctx.task_id, source = %source, error = %e, "warehouse read failed");
                outcome.missing += 1;
            }
        }
    }

    Ok(outcome)
}

/// Parameterised read-only template per logical source.
fn read_template(source: &str) -> String {
    match source {
        "sales" => {
            "SELECT vehicle_make, vehicle_model, units_sold, total_revenue FROM sales WHERE tenant_id = @tenant_id".to_string()
        }
        "inventory" => {
            "SELECT vehicle_make, vehicle_model, inventory_count, avg_days_on_lot FROM inventory WHERE tenant_id = @tenant_id".to_string()
        }
        "customers" => {
            "SELECT lead_source, lead_count, conversions FROM customers WHERE tenant_id = @tenant_id".to_string()
        }
        "service" => {
            "SELECT service_type, jobs, revenue FROM service WHERE tenant_id = @tenant_id".to_string()
        }
        other => format!("SELECT * FROM {other} WHERE tenant_id = @tenant_id"),
    }
}

/// Render retrieved rows for the prompt, bounded by `max_rows`. Overflow is
/// summarised as per-field aggregates rather than raw rows.
fn render_data_section(sections: &[(String, RowSet)], max_rows: usize) -> String {
    let mut out = String::new();
    let mut budget = max_rows.max(1);

    for (source, rows) in sections {
        out.push_str(&format!(
            "Source {} ({} rows{}):\n",
            source,
            rows.len(),
            if rows.truncated { ", truncated" } else { "" }
        ));

        let include = rows.len().min(budget);
        for row in rows.rows.iter().take(include) {
            out.push_str(&row.to_string());
            out.push('\n');
        }
        budget = budget.saturating_sub(include);

        let omitted = rows.len() - include;
        if omitted > 0 {
            out.push_str(&format!(
                "[{omitted} rows omitted; aggregates follow]\n{}",
                render_aggregates(&rows.rows)
            ));
        }
        out.push('\n');
    }
    out
}

/// Per-numeric-field count/min/max/sum over a row set.
fn render_aggregates(rows: &[Value]) -> String {
    use std::collections::BTreeMap;
    let mut stats: BTreeMap<String, (usize, f64, f64, f64)> = BTreeMap::new();

    for row in rows {
        let Some(object) = row.as_object() else { continue };
        for (key, value) in object {
            if let Some(number) = value.as_f64() {
                let entry = stats
                    .entry(key.clone())
                    .or_insert((0, f64::INFINITY, f64::NEG_INFINITY, 0.0));
                entry.0 += 1;
                entry.1 = entry.1.min(number);
                entry.2 = entry.2.max(number);
                entry.3 += number;
            }
        }
    }

    let mut out = String::new();
    for (field, (count, min, max, sum)) in stats {
        out.push_str(&format!(
            "aggregate {field}: count={count} min={min} max={max} sum={sum}\n"
        ));
    }
    out
}

fn draft_schema() -> &'static str {
    r#"{"summary": "...", "key_metrics": {"metric_name": 0.0}, "insights": ["..."], "recommendations": [{"priority": "high|medium|low", "action": "..."}], "changes": ["..."]}"#
}

fn revision_section(ctx: &DraftContext) -> String {
    if ctx.revision_feedback.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    out.push_str("\nA previous draft failed quality review. Address every issue below:\n");
    for issue in &ctx.revision_feedback {
        out.push_str(&format!("- {issue}\n"));
    }
    if let Some(previous) = &ctx.previous {
        out.push_str("\nPrevious draft content:\n");
        out.push_str(&serde_json::to_string(previous).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(
        "\nKeep previously validated findings, and record what changed for each issue in `changes`.\n",
    );
    out
}

fn standard_prompt(ctx: &DraftContext, data_section: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Analyze the following automotive dealership data to answer this query:\n");
    prompt.push_str(&format!("\"{}\"\n\n", ctx.query));
    prompt.push_str("Data retrieved:\n");
    prompt.push_str(data_section);
    prompt.push_str("\nProvide:\n");
    prompt.push_str("1. Key findings and insights\n");
    prompt.push_str("2. Relevant metrics and KPIs\n");
    prompt.push_str("3. Trends or patterns observed\n");
    prompt.push_str("4. Actionable recommendations with priorities\n");
    prompt.push_str(&revision_section(ctx));
    prompt.push_str("\nRespond with ONE JSON object:\n");
    prompt.push_str(draft_schema());
    prompt.push('\n');
    prompt
}

fn senior_prompt(ctx: &DraftContext, data_section: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Perform advanced analysis of the following automotive dealership data:\n");
    prompt.push_str(&format!("\"{}\"\n\n", ctx.query));
    prompt.push_str("Data retrieved:\n");
    prompt.push_str(data_section);
    prompt.push_str("\nApply advanced analytical techniques:\n");
    prompt.push_str("1. Statistical analysis with confidence intervals\n");
    prompt.push_str("2. Trend forecasting with a stated horizon and method\n");
    prompt.push_str("3. Anomaly detection and outlier callouts\n");
    prompt.push_str("4. Multi-axis comparison over matching time windows\n");
    prompt.push_str("5. Risk assessment with prioritised recommendations\n");
    prompt.push_str(&revision_section(ctx));
    prompt.push_str("\nRespond with ONE JSON object:\n");
    prompt.push_str(draft_schema());
    prompt.push('\n');
    prompt
}

/// Coverage-driven confidence: start at 0.9, subtract 0.2 per missing
/// source, 0.1 if any read was truncated, 0.15 if the model needed a retry.
fn compute_confidence(missing: usize, any_truncated: bool, retried: bool) -> f64 {
    let mut confidence = 0.9 - 0.2 * missing as f64;
    if any_truncated {
        confidence -= 0.1;
    }
    if retried {
        confidence -= 0.15;
    }
    confidence.clamp(0.0, 1.0)
}

fn fallback_content() -> DraftContent {
    DraftContent {
        summary: "Analysis could not be parsed from the model output".to_string(),
        insights: vec!["Please try rephrasing your query".to_string()],
        recommendations: vec![Recommendation {
            priority: Priority::Medium,
            action: "Ensure the query is specific and clear".to_string(),
        }],
        ..DraftContent::default()
    }
}
