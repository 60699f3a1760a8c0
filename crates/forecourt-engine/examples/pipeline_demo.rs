//! Flow pipeline example for Forecourt
//!
//! Demonstrates: query -> classify -> draft -> validate -> format, end to
//! end against deterministic stub collaborators.

use std::sync::Arc;

use forecourt_clients::{
    MockModelTransport, MockWarehouseBackend, ModelFacade, ModelFacadeConfig, WarehouseFacade,
    WarehouseFacadeConfig,
};
use forecourt_config::FlowConfig;
use forecourt_core::types::InsightRequest;
use forecourt_engine::FlowEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== Forecourt Flow Pipeline Example ===\n");

    let transport = MockModelTransport::new()
        .route(
            "Classify this automotive dealership query",
            vec![r#"{"signals": ["aggregation"], "data_sources": ["sales"]}"#],
        )
        .route(
            "Analyze the following",
            vec![
                r#"{
                    "summary": "Top three models last quarter, ranked by units sold",
                    "key_metrics": {"camry_units": 15.0, "accord_units": 12.0, "f150_units": 10.0},
                    "insights": ["Toyota Camry leads, ordered by units across the quarter"],
                    "recommendations": [{"priority": "high", "action": "Increase Camry allocation"}]
                }"#,
            ],
        )
        .route(
            "Evaluate the business logic",
            vec![r#"{"is_reasonable": true, "logic_score": 0.85, "issues": []}"#],
        );
    let model = ModelFacade::new(transport, ModelFacadeConfig::default());
    let warehouse = WarehouseFacade::new(
        MockWarehouseBackend::with_sample_data(),
        WarehouseFacadeConfig::default(),
    );

    let engine = FlowEngine::new(
        FlowConfig::default(),
        Arc::new(model),
        Arc::new(warehouse),
    );

    let request = InsightRequest::new("top three selling models last quarter", "dealer_123");
    let response = engine.process(request).await?;

    println!("Summary: {}", response.summary);
    println!("Confidence: {}", response.confidence_level.as_str());
    println!("Task: {}", response.metadata.task_id);
    println!("Response payload:\n{}", serde_json::to_string_pretty(&response)?);

    let metrics = engine.metrics();
    println!("\nQueries: {}", metrics.total_queries);
    println!("Delivered: {}", metrics.delivered);
    println!("Mean latency: {:.1}ms", metrics.latency_mean_ms);

    println!("\n=== Example Complete ===");
    Ok(())
}
