//! End-to-end pipeline scenarios

use std::sync::Arc;

use serde_json::{json, Value};

use tradewind_storage::{MemoryStorage, Storage};
use tradewind_transform::{
    CreatePipelineInput, PipelineService, PipelineStatus, RunOptions, RunStatus, StepStatus,
    StepType, TransformError, TransformStep,
};

fn step(id: &str, step_type: StepType, config: Value) -> TransformStep {
    TransformStep {
        id: id.to_string(),
        name: None,
        step_type,
        config,
        order: 0,
        depends_on: vec![],
    }
}

async fn seed(storage: &MemoryStorage, collection: &str, rows: Vec<Value>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let repository = storage.ensure_collection(collection).await;
    for row in rows {
        repository.create(row).await.unwrap();
    }
}

async fn seed_regional_sales(storage: &MemoryStorage) {
    seed(
        storage,
        "orders",
        vec![
            json!({"id": "o1", "customerId": "c1", "amount": 100, "status": "completed"}),
            json!({"id": "o2", "customerId": "c1", "amount": 150, "status": "completed"}),
            json!({"id": "o3", "customerId": "c2", "amount": 200, "status": "pending"}),
            json!({"id": "o4", "customerId": "c3", "amount": 75, "status": "completed"}),
        ],
    )
    .await;
    seed(
        storage,
        "customers",
        vec![
            json!({"id": "c1", "region": "North"}),
            json!({"id": "c2", "region": "South"}),
            json!({"id": "c3", "region": "North"}),
        ],
    )
    .await;
}

fn regional_sales_pipeline() -> CreatePipelineInput {
    CreatePipelineInput {
        name: "regional sales".to_string(),
        status: Some(PipelineStatus::Active),
        steps: vec![
            step(
                "only-completed",
                StepType::Filter,
                json!({
                    "source": "orders",
                    "output": "_temp_completed",
                    "conditions": [{"field": "status", "op": "==", "value": "completed"}],
                }),
            ),
            step(
                "attach-region",
                StepType::Join,
                json!({
                    "left": "_temp_completed",
                    "right": "customers",
                    "output": "_temp_with_region",
                    "joinType": "inner",
                    "on": [{"leftField": "customerId", "rightField": "id"}],
                }),
            ),
            step(
                "by-region",
                StepType::Aggregate,
                json!({
                    "source": "_temp_with_region",
                    "output": "regional_sales",
                    "groupBy": ["region"],
                    "aggregations": [
                        {"function": "sum", "field": "amount", "as": "totalSales"},
                        {"function": "count", "as": "orderCount"},
                    ],
                }),
            ),
        ],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_regional_sales_end_to_end() {
    // S5: filter -> inner join -> aggregate by region
    let storage = MemoryStorage::new();
    seed_regional_sales(&storage).await;
    let service = PipelineService::new(Arc::new(storage.clone()));

    let pipeline = service
        .create_pipeline(regional_sales_pipeline())
        .await
        .unwrap();
    let run = service
        .run_pipeline(&pipeline.id, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.step_results.len(), 3);
    assert!(run.step_results.iter().all(|r| r.status == StepStatus::Completed));
    assert_eq!(run.step_results[0].input_rows, 4);
    assert_eq!(run.step_results[0].output_rows, 3);

    let rows = storage
        .repository("regional_sales")
        .await
        .unwrap()
        .find_all(None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["region"], json!("North"));
    assert_eq!(rows[0]["totalSales"], json!(325.0));
    assert_eq!(rows[0]["orderCount"], json!(3));
}

#[tokio::test]
async fn test_temp_collections_are_garbage_collected() {
    let storage = MemoryStorage::new();
    seed_regional_sales(&storage).await;
    let service = PipelineService::new(Arc::new(storage.clone()));
    let pipeline = service
        .create_pipeline(regional_sales_pipeline())
        .await
        .unwrap();
    service
        .run_pipeline(&pipeline.id, RunOptions::default())
        .await
        .unwrap();

    let collections = storage.collections().await;
    assert!(collections
        .iter()
        .all(|name| !name.starts_with("_temp_") && !name.starts_with("_preview_")));
    // The durable output survives GC
    assert!(collections.iter().any(|name| name == "regional_sales"));
}

#[tokio::test]
async fn test_dependency_skip_after_failure() {
    // S6: step B depends on a failed step A and is skipped, with
    // continueOnError keeping the run going
    let storage = MemoryStorage::new();
    seed(&storage, "orders", vec![json!({"id": "o1"})]).await;
    let service = PipelineService::new(Arc::new(storage.clone()));

    let mut step_b = step(
        "B",
        StepType::Filter,
        json!({"source": "orders", "output": "_temp_b"}),
    );
    step_b.depends_on = vec!["A".to_string()];
    let pipeline = service
        .create_pipeline(CreatePipelineInput {
            name: "doomed".to_string(),
            status: Some(PipelineStatus::Active),
            steps: vec![
                // A reads a collection that does not exist
                step(
                    "A",
                    StepType::Filter,
                    json!({"source": "missing_collection", "output": "_temp_a"}),
                ),
                step_b,
                step(
                    "C",
                    StepType::Filter,
                    json!({"source": "orders", "output": "survivors"}),
                ),
            ],
            ..Default::default()
        })
        .await
        .unwrap();

    let run = service
        .run_pipeline(&pipeline.id, RunOptions {
            continue_on_error: true,
        })
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.step_results[0].status, StepStatus::Failed);
    assert_eq!(run.step_results[1].status, StepStatus::Skipped);
    assert_eq!(run.step_results[1].error.as_deref(), Some("Dependencies not met"));
    assert!(run.step_results[1].output_collection.is_none());
    // C has no dependencies and still ran
    assert_eq!(run.step_results[2].status, StepStatus::Completed);
}

#[tokio::test]
async fn test_failure_without_continue_stops_the_run() {
    let storage = MemoryStorage::new();
    seed(&storage, "orders", vec![json!({"id": "o1"})]).await;
    let service = PipelineService::new(Arc::new(storage.clone()));
    let pipeline = service
        .create_pipeline(CreatePipelineInput {
            name: "halting".to_string(),
            status: Some(PipelineStatus::Active),
            steps: vec![
                step(
                    "A",
                    StepType::Filter,
                    json!({"source": "missing_collection", "output": "_temp_a"}),
                ),
                step(
                    "B",
                    StepType::Filter,
                    json!({"source": "orders", "output": "_temp_b"}),
                ),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let run = service
        .run_pipeline(&pipeline.id, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    // B never got a result
    assert_eq!(run.step_results.len(), 1);
}

#[tokio::test]
async fn test_inactive_pipeline_is_rejected() {
    let storage = MemoryStorage::new();
    let service = PipelineService::new(Arc::new(storage));
    let pipeline = service
        .create_pipeline(CreatePipelineInput {
            name: "draft".to_string(),
            steps: vec![step(
                "A",
                StepType::Filter,
                json!({"source": "orders", "output": "out"}),
            )],
            ..Default::default()
        })
        .await
        .unwrap();
    let result = service.run_pipeline(&pipeline.id, RunOptions::default()).await;
    assert!(matches!(result, Err(TransformError::PipelineNotActive(_))));
}

#[tokio::test]
async fn test_invalid_pipeline_input_is_blocked() {
    let storage = MemoryStorage::new();
    let service = PipelineService::new(Arc::new(storage));
    let result = service
        .create_pipeline(CreatePipelineInput {
            name: String::new(),
            ..Default::default()
        })
        .await;
    let Err(TransformError::Invalid(errors)) = result else {
        panic!("expected validation failure");
    };
    assert!(errors.iter().any(|e| e.field == "name" && e.code == "REQUIRED_FIELD"));
}

#[tokio::test]
async fn test_preview_leaves_storage_untouched() {
    let storage = MemoryStorage::new();
    seed(
        &storage,
        "orders",
        vec![
            json!({"id": "o1", "status": "completed"}),
            json!({"id": "o2", "status": "pending"}),
        ],
    )
    .await;
    let service = PipelineService::new(Arc::new(storage.clone()));

    let collections_before = storage.collections().await;
    let rows_before = storage
        .repository("orders")
        .await
        .unwrap()
        .find_all(None)
        .await
        .unwrap();

    let preview = service
        .preview_step(
            step(
                "",
                StepType::Filter,
                json!({
                    "source": "orders",
                    "output": "ignored",
                    "conditions": [{"field": "status", "op": "==", "value": "completed"}],
                }),
            ),
            Some(10),
        )
        .await;
    assert_eq!(preview.rows.len(), 1);
    assert_eq!(preview.rows[0]["id"], json!("o1"));

    assert_eq!(storage.collections().await, collections_before);
    let rows_after = storage
        .repository("orders")
        .await
        .unwrap()
        .find_all(None)
        .await
        .unwrap();
    assert_eq!(rows_after, rows_before);
}

#[tokio::test]
async fn test_preview_swallows_errors() {
    let storage = MemoryStorage::new();
    let service = PipelineService::new(Arc::new(storage.clone()));
    let preview = service
        .preview_step(
            step(
                "p",
                StepType::Filter,
                json!({"source": "missing", "output": "ignored"}),
            ),
            None,
        )
        .await;
    assert!(preview.rows.is_empty());
    assert!(storage
        .collections()
        .await
        .iter()
        .all(|name| !name.starts_with("_preview_")));
}

#[tokio::test]
async fn test_runs_are_persisted_and_listable() {
    let storage = MemoryStorage::new();
    seed_regional_sales(&storage).await;
    let service = PipelineService::new(Arc::new(storage.clone()));
    let pipeline = service
        .create_pipeline(regional_sales_pipeline())
        .await
        .unwrap();
    let run = service
        .run_pipeline(&pipeline.id, RunOptions::default())
        .await
        .unwrap();

    let fetched = service.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, RunStatus::Completed);
    assert!(fetched.completed_at.is_some());

    let listed = service.list_runs(Some(&pipeline.id)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(service.list_runs(Some("other")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_steps_run_in_declared_order_with_order_field() {
    let storage = MemoryStorage::new();
    seed(&storage, "orders", vec![json!({"id": "o1", "n": 1})]).await;
    let service = PipelineService::new(Arc::new(storage.clone()));
    let mut first = step(
        "first",
        StepType::Filter,
        json!({"source": "orders", "output": "_temp_first"}),
    );
    first.order = 1;
    let mut second = step(
        "second",
        StepType::Filter,
        json!({"source": "_temp_first", "output": "final"}),
    );
    second.order = 2;
    let pipeline = service
        .create_pipeline(CreatePipelineInput {
            name: "ordered".to_string(),
            status: Some(PipelineStatus::Active),
            // Declared out of order on purpose
            steps: vec![second, first],
            ..Default::default()
        })
        .await
        .unwrap();
    let run = service
        .run_pipeline(&pipeline.id, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.step_results[0].step_id, "first");
    assert_eq!(run.step_results[1].step_id, "second");
    let rows = storage
        .repository("final")
        .await
        .unwrap()
        .find_all(None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}
