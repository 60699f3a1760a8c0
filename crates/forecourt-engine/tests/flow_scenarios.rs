//! End-to-end flow scenarios under deterministic model and warehouse stubs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use forecourt_clients::{
    MockModelTransport, MockWarehouseBackend, ModelFacade, ModelFacadeConfig, WarehouseFacade,
    WarehouseFacadeConfig,
};
use forecourt_config::FlowConfig;
use forecourt_core::types::{ConfidenceLevel, FlowFailure, InsightRequest, TaskStatus};
use forecourt_engine::FlowEngine;

const CLASSIFY_MARKER: &str = "Classify this automotive dealership query";
const STANDARD_MARKER: &str = "Analyze the following";
const SENIOR_MARKER: &str = "Perform advanced analysis";
const VALIDATE_MARKER: &str = "Evaluate the business logic";

const CLASSIFY_SALES: &str = r#"{"signals": ["aggregation"], "data_sources": ["sales"]}"#;
const ASSESSMENT_STRONG: &str = r#"{"is_reasonable": true, "logic_score": 0.9, "issues": []}"#;
const ASSESSMENT_GOOD: &str = r#"{"is_reasonable": true, "logic_score": 0.78, "issues": []}"#;

const RANKED_DRAFT: &str = r#"{
    "summary": "Top three models last quarter, ranked by units sold",
    "key_metrics": {"camry_units": 15.0, "accord_units": 12.0, "f150_units": 10.0},
    "insights": ["Toyota Camry leads, ordered by units across the quarter"],
    "recommendations": [{"priority": "high", "action": "Increase Camry allocation"}]
}"#;

const SIMPLE_DRAFT: &str = r#"{
    "summary": "45 units sold last month",
    "key_metrics": {"units_sold": 45.0},
    "insights": ["Sales held steady month over month"],
    "recommendations": [{"priority": "medium", "action": "Maintain current inventory mix"}]
}"#;

const FORECAST_DRAFT_NO_HORIZON: &str = r#"{
    "summary": "Revenue is projected to grow",
    "key_metrics": {"projected_revenue": 1450000.0},
    "insights": ["Growth is expected to continue"],
    "recommendations": [{"priority": "high", "action": "Expand SUV inventory"}]
}"#;

const FORECAST_DRAFT_REVISED: &str = r#"{
    "summary": "Revenue forecast for the next quarter horizon",
    "key_metrics": {"projected_revenue": 1450000.0},
    "insights": ["Projected 8% growth over the next quarter horizon using a time series trend model"],
    "recommendations": [{"priority": "high", "action": "Expand SUV inventory ahead of the quarter"}],
    "changes": ["stated the forecast horizon", "stated the forecasting method"]
}"#;

fn engine_with(
    config: FlowConfig,
    transport: Arc<MockModelTransport>,
    backend: Arc<MockWarehouseBackend>,
) -> FlowEngine {
    let model = ModelFacade::new(
        transport,
        ModelFacadeConfig {
            max_attempts: config.model_retry_attempts,
            call_timeout: config.model_call_timeout(),
            backoff: forecourt_clients::BackoffConfig {
                floor_ms: 1,
                ceiling_ms: 2,
                jitter: 0.0,
                multiplier: 2.0,
            },
        },
    );
    let warehouse = WarehouseFacade::new(
        backend,
        WarehouseFacadeConfig {
            call_timeout: config.warehouse_call_timeout(),
            ..WarehouseFacadeConfig::default()
        },
    );
    FlowEngine::new(config, Arc::new(model), Arc::new(warehouse))
}

#[tokio::test]
async fn simple_query_hits_cache_on_second_call() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![SIMPLE_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport.clone(), backend);

    let request = InsightRequest::new("units sold last month", "d1");
    let first = engine.process(request.clone()).await.unwrap();
    assert!(!first.metadata.cached);
    assert_eq!(first.metadata.revisions_used, 0);
    let calls_after_first = transport.call_count();

    let second = engine.process(request).await.unwrap();
    assert!(second.metadata.cached);
    assert_eq!(second.summary, first.summary);
    assert_eq!(second.detailed, first.detailed);
    // No tier ran for the cached call.
    assert_eq!(transport.call_count(), calls_after_first);

    let metrics = engine.metrics();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.total_queries, 2);
}

#[tokio::test]
async fn standard_query_approves_in_a_single_pass() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![RANKED_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_GOOD]),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport, backend);

    let response = engine
        .process(InsightRequest::new(
            "top three selling models last quarter",
            "d1",
        ))
        .await
        .unwrap();

    // 0.35 + 0.25 + 0.25*0.78 + 0.15 = 0.945
    assert_eq!(response.confidence_level, ConfidenceLevel::High);
    assert_eq!(response.metadata.revisions_used, 0);
    assert_eq!(response.metadata.complexity.as_str(), "standard");

    let snapshot = engine
        .task_status(&response.metadata.task_id)
        .await
        .unwrap();
    assert_eq!(snapshot.status, TaskStatus::Delivered);
    assert_eq!(snapshot.draft_count, 1);
    assert!(snapshot.has_validated_draft);
}

#[tokio::test]
async fn forecast_revises_once_then_approves() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(
                CLASSIFY_MARKER,
                vec![r#"{"signals": ["forecast"], "data_sources": ["sales"]}"#],
            )
            .route(
                SENIOR_MARKER,
                vec![FORECAST_DRAFT_NO_HORIZON, FORECAST_DRAFT_REVISED],
            )
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport, backend);

    let response = engine
        .process(InsightRequest::new("forecast next quarter revenue", "d1"))
        .await
        .unwrap();

    assert_eq!(response.metadata.revisions_used, 1);
    assert_eq!(response.metadata.complexity.as_str(), "complex");
    // Revised draft scores 0.35 + 0.25 + 0.225 + 0.15 = 0.975.
    assert_eq!(response.confidence_level, ConfidenceLevel::VeryHigh);

    let snapshot = engine
        .task_status(&response.metadata.task_id)
        .await
        .unwrap();
    assert_eq!(snapshot.draft_count, 2);
    assert!(snapshot.has_validated_draft);
    assert_eq!(snapshot.status, TaskStatus::Delivered);
}

#[tokio::test]
async fn critical_query_rejects_after_max_revisions() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(
                CLASSIFY_MARKER,
                vec![r#"{"signals": ["strategic"], "data_sources": ["sales", "inventory"]}"#],
            )
            .route(SENIOR_MARKER, vec![RANKED_DRAFT])
            .route(
                VALIDATE_MARKER,
                // Strong axes but not strong enough for the 0.95 gate.
                vec![r#"{"is_reasonable": true, "logic_score": 0.7, "issues": []}"#],
            ),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport.clone(), backend);

    let failure = engine
        .process(InsightRequest::new(
            "strategic risk assessment of a 2M EV inventory investment",
            "d1",
        ))
        .await
        .unwrap_err();

    let FlowFailure::QualityRejected {
        task_id,
        last_feedback,
        revisions_used,
    } = failure
    else {
        panic!("expected quality_rejected, got {failure:?}");
    };
    assert_eq!(revisions_used, 2);
    assert!(!last_feedback.is_empty());

    let snapshot = engine.task_status(&task_id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Rejected);
    assert_eq!(snapshot.draft_count, 3);
    assert!(!snapshot.has_validated_draft);

    // Rejections are never cached: a repeat runs the full pipeline again.
    let calls_after_first = transport.call_count();
    let repeat = engine
        .process(InsightRequest::new(
            "strategic risk assessment of a 2M EV inventory investment",
            "d1",
        ))
        .await;
    assert!(repeat.is_err());
    assert!(transport.call_count() > calls_after_first);
    assert_eq!(engine.metrics().cache_hits, 0);
}

#[tokio::test]
async fn slow_warehouse_times_out_and_cancels_outstanding_calls() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![SIMPLE_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(
        MockWarehouseBackend::with_sample_data().with_delay(Duration::from_secs(30)),
    );
    let config = FlowConfig {
        query_timeout_ms: 300,
        ..FlowConfig::default()
    };
    let engine = engine_with(config, transport, backend.clone());

    let started = Instant::now();
    let failure = engine
        .process(InsightRequest::new("units sold last month", "d1"))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    let FlowFailure::TimedOut {
        task_id,
        elapsed_ms,
    } = failure
    else {
        panic!("expected timed_out, got {failure:?}");
    };
    assert!(elapsed_ms >= 300);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
    assert!(backend.saw_cancellation());

    let snapshot = engine.task_status(&task_id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::TimedOut);
}

#[tokio::test]
async fn concurrent_identical_queries_coalesce_into_one_flow() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![SIMPLE_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG])
            .with_delay(Duration::from_millis(40)),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = Arc::new(engine_with(FlowConfig::default(), transport.clone(), backend));

    let request = InsightRequest::new("units sold last month", "d1");
    let engine_a = engine.clone();
    let request_a = request.clone();
    let first = tokio::spawn(async move { engine_a.process(request_a).await });
    // Give the first call time to register as the in-flight runner.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = engine.process(request).await;
    let first = first.await.unwrap();

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);

    // One classify, one draft, one validation: three model calls total.
    assert_eq!(transport.call_count(), 3);
    let metrics = engine.metrics();
    assert_eq!(metrics.coalesced, 1);
    // The winner's delivery populated the cache exactly once.
    let third = engine
        .process(InsightRequest::new("units sold last month", "d1"))
        .await
        .unwrap();
    assert!(third.metadata.cached);
}

#[tokio::test]
async fn arrivals_beyond_the_active_cap_are_rejected_as_overloaded() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![SIMPLE_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG])
            .with_delay(Duration::from_millis(60)),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let config = FlowConfig {
        max_active_tasks: 1,
        ..FlowConfig::default()
    };
    let engine = Arc::new(engine_with(config, transport, backend));

    let engine_a = engine.clone();
    let first = tokio::spawn(async move {
        engine_a
            .process(InsightRequest::new("units sold last month", "d1"))
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Different query, so it cannot coalesce; it must be admitted or shed.
    let failure = engine
        .process(InsightRequest::new("inventory on the lot today", "d1"))
        .await
        .unwrap_err();
    let FlowFailure::Overloaded { retry_after_ms } = failure else {
        panic!("expected overloaded, got {failure:?}");
    };
    assert!(retry_after_ms > 0);

    assert!(first.await.unwrap().is_ok());
    assert_eq!(engine.metrics().overloaded, 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_task_exists() {
    let transport = Arc::new(MockModelTransport::new());
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport.clone(), backend);

    for request in [
        InsightRequest::new("", "d1"),
        InsightRequest::new("   ", "d1"),
        InsightRequest::new("units sold", ""),
        InsightRequest::new("q".repeat(2049), "d1"),
    ] {
        let failure = engine.process(request).await.unwrap_err();
        assert!(matches!(failure, FlowFailure::InvalidRequest { .. }));
    }
    // No tier was ever consulted.
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn query_at_the_length_boundary_is_accepted() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![RANKED_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport, backend);

    let query = "q".repeat(2048);
    let response = engine.process(InsightRequest::new(query, "d1")).await;
    assert!(response.is_ok());
}

#[tokio::test]
async fn zero_revision_budget_turns_first_revise_into_reject() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(
                CLASSIFY_MARKER,
                vec![r#"{"signals": ["forecast"], "data_sources": ["sales"]}"#],
            )
            .route(SENIOR_MARKER, vec![FORECAST_DRAFT_NO_HORIZON])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let config = FlowConfig {
        max_revisions: 0,
        ..FlowConfig::default()
    };
    let engine = engine_with(config, transport, backend);

    let failure = engine
        .process(InsightRequest::new("forecast next quarter revenue", "d1"))
        .await
        .unwrap_err();

    let FlowFailure::QualityRejected {
        task_id,
        revisions_used,
        ..
    } = failure
    else {
        panic!("expected quality_rejected, got {failure:?}");
    };
    assert_eq!(revisions_used, 0);

    let snapshot = engine.task_status(&task_id).await.unwrap();
    assert_eq!(snapshot.draft_count, 1);
    assert_eq!(snapshot.status, TaskStatus::Rejected);
}

#[tokio::test]
async fn empty_row_sets_reject_structurally_rather_than_crash() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(
                CLASSIFY_MARKER,
                vec![r#"{"signals": ["forecast"], "data_sources": ["sales"]}"#],
            )
            .route(SENIOR_MARKER, vec![FORECAST_DRAFT_REVISED])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(MockWarehouseBackend::new());
    backend.load_table("sales", Vec::new());
    let engine = engine_with(FlowConfig::default(), transport, backend);

    // data_accuracy drops to 0.7 for the empty read, leaving the complex
    // gate (0.90) out of reach: 0.35*0.7 + 0.25 + 0.225 + 0.15 = 0.87.
    let failure = engine
        .process(InsightRequest::new("forecast next quarter revenue", "d1"))
        .await
        .unwrap_err();
    assert!(matches!(failure, FlowFailure::QualityRejected { .. }));
}

#[tokio::test]
async fn lifecycle_events_trace_the_single_pass_flow() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![SIMPLE_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport, backend);

    let mut events = engine.subscribe_lifecycle();
    engine
        .process(InsightRequest::new("units sold last month", "d1"))
        .await
        .unwrap();

    let mut observed = Vec::new();
    while let Ok(event) = events.try_recv() {
        observed.push(event.to);
    }
    assert_eq!(
        observed,
        vec![
            TaskStatus::Analyzing,
            TaskStatus::Generating,
            TaskStatus::Validating,
            TaskStatus::Approved,
            TaskStatus::Delivered,
        ]
    );
}

#[tokio::test]
async fn metrics_aggregate_across_outcomes() {
    let transport = Arc::new(
        MockModelTransport::new()
            .route(CLASSIFY_MARKER, vec![CLASSIFY_SALES])
            .route(STANDARD_MARKER, vec![SIMPLE_DRAFT])
            .route(VALIDATE_MARKER, vec![ASSESSMENT_STRONG]),
    );
    let backend = Arc::new(MockWarehouseBackend::with_sample_data());
    let engine = engine_with(FlowConfig::default(), transport, backend);

    engine
        .process(InsightRequest::new("units sold last month", "d1"))
        .await
        .unwrap();
    engine
        .process(InsightRequest::new("units sold last month", "d1"))
        .await
        .unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.total_queries, 2);
    assert_eq!(metrics.delivered, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.by_complexity["simple"], 1);
    assert_eq!(metrics.active_tasks, 0);
    assert!((metrics.mean_revisions_per_approval - 0.0).abs() < 1e-9);

    let audit = engine.audit_summary();
    assert_eq!(audit.total_validations, 1);
    assert_eq!(audit.approved, 1);
}
