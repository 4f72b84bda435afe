//! End-to-end workflow engine scenarios

use std::sync::Arc;

use serde_json::{json, Value};

use tradewind_core::collaborators::{CannedHttpClient, HttpResponse, RecordingLogger, RecordingMessageHandler};
use tradewind_core::condition::{CompareOp, Condition, ValueSource};
use tradewind_storage::{MemoryStorage, Storage};
use tradewind_workflow::{
    ActionDef, CreateWorkflowInput, ErrorPolicy, ExecutionStatus, HistoryStatus, StepKind,
    WorkflowError, WorkflowService, WorkflowStatus, WorkflowStep,
};

struct Fixture {
    storage: MemoryStorage,
    logger: Arc<RecordingLogger>,
    service: WorkflowService,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let storage = MemoryStorage::new();
    let logger = Arc::new(RecordingLogger::new());
    let service = WorkflowService::new(
        Arc::new(storage.clone()),
        Arc::new(RecordingMessageHandler::new()),
        Arc::new(CannedHttpClient::new(HttpResponse {
            status: 200,
            body: json!({}),
        })),
        logger.clone(),
    );
    Fixture {
        storage,
        logger,
        service,
    }
}

fn step(id: &str, kind: StepKind) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        name: None,
        kind,
    }
}

fn log_step(id: &str, message: &str, next: Option<&str>) -> WorkflowStep {
    step(
        id,
        StepKind::Action {
            action: ActionDef::Log {
                level: Default::default(),
                message: ValueSource::constant(json!(message)),
                data: None,
            },
            next: next.map(str::to_string),
            on_error: ErrorPolicy::Fail,
        },
    )
}

fn end_step(id: &str) -> WorkflowStep {
    step(
        id,
        StepKind::End {
            status: None,
            reason: None,
        },
    )
}

fn branch_workflow() -> CreateWorkflowInput {
    CreateWorkflowInput {
        name: "branching".to_string(),
        status: Some(WorkflowStatus::Active),
        steps: vec![
            step(
                "check",
                StepKind::Condition {
                    condition: Condition::Compare {
                        left: ValueSource::field("value"),
                        op: CompareOp::Gt,
                        right: ValueSource::constant(json!(10)),
                    },
                    on_true: Some("pass".to_string()),
                    on_false: Some("fail".to_string()),
                },
            ),
            log_step("pass", "took the pass branch", Some("finish")),
            log_step("fail", "took the fail branch", Some("finish")),
            end_step("finish"),
        ],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_condition_branch_follows_on_true() {
    // S3: value > 10 routes through the pass branch to completion
    let f = fixture();
    let workflow = f.service.create_workflow(branch_workflow()).await.unwrap();
    let execution = f
        .service
        .start_execution(&workflow.id, Some(json!({"value": 15})))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.history[1].step_id, "pass");
    assert!(execution.current_step_id.is_none());
    assert!(execution.completed_at.is_some());
    assert_eq!(f.logger.entries()[0].message, "took the pass branch");
}

#[tokio::test]
async fn test_condition_branch_follows_on_false() {
    let f = fixture();
    let workflow = f.service.create_workflow(branch_workflow()).await.unwrap();
    let execution = f
        .service
        .start_execution(&workflow.id, Some(json!({"value": 5})))
        .await
        .unwrap();
    assert_eq!(execution.history[1].step_id, "fail");
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_runs_are_deterministic() {
    // Same definition, same context, same collaborators: identical history
    let f = fixture();
    let workflow = f.service.create_workflow(branch_workflow()).await.unwrap();
    let first = f
        .service
        .start_execution(&workflow.id, Some(json!({"value": 42})))
        .await
        .unwrap();
    let second = f
        .service
        .start_execution(&workflow.id, Some(json!({"value": 42})))
        .await
        .unwrap();

    let shape = |execution: &tradewind_workflow::WorkflowExecution| {
        execution
            .history
            .iter()
            .map(|entry| (entry.step_id.clone(), entry.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&first), shape(&second));
    assert_eq!(first.status, second.status);
}

#[tokio::test]
async fn test_pause_and_resume() {
    // S4: pause surfaces as a paused execution; resume merges input and
    // completes
    let f = fixture();
    let workflow = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "approval".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "wait",
                    StepKind::Pause {
                        reason: Some("approval".to_string()),
                        next: Some("finish".to_string()),
                        resume_condition: None,
                        timeout_ms: None,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();

    let execution = f.service.start_execution(&workflow.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Paused);
    assert!(execution.paused_at.is_some());
    assert_eq!(execution.current_step_id.as_deref(), Some("wait"));

    let resumed = f
        .service
        .resume_execution(&execution.id, Some(json!({"approved": true})))
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.context["approved"], json!(true));
    assert!(resumed.paused_at.is_none());
}

#[tokio::test]
async fn test_pause_with_satisfied_resume_condition_passes_through() {
    let f = fixture();
    let workflow = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "auto-resume".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "gate",
                    StepKind::Pause {
                        reason: None,
                        next: Some("finish".to_string()),
                        resume_condition: Some(Condition::Compare {
                            left: ValueSource::field("ready"),
                            op: CompareOp::Eq,
                            right: ValueSource::constant(json!(true)),
                        }),
                        timeout_ms: Some(5_000),
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f
        .service
        .start_execution(&workflow.id, Some(json!({"ready": true})))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_action_on_error_policies() {
    let f = fixture();
    // createEntity against an unregistered collection always fails
    let failing_action = || ActionDef::CreateEntity {
        collection: "ghosts".to_string(),
        fields: Default::default(),
        save_result_to: None,
    };

    // fail: the execution fails with the action's error
    let wf_fail = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "fail-policy".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "boom",
                    StepKind::Action {
                        action: failing_action(),
                        next: Some("finish".to_string()),
                        on_error: ErrorPolicy::Fail,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&wf_fail.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error.as_deref(),
        Some("Collection ghosts is not registered")
    );
    assert_eq!(execution.history[0].status, HistoryStatus::Failed);

    // continue: history records the failure, the run proceeds to `next`
    let wf_continue = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "continue-policy".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "boom",
                    StepKind::Action {
                        action: failing_action(),
                        next: Some("finish".to_string()),
                        on_error: ErrorPolicy::Continue,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&wf_continue.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.history[0].status, HistoryStatus::Failed);
    assert_eq!(execution.history[1].step_id, "finish");

    // step id: the failure routes to a recovery step
    let wf_goto = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "goto-policy".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "boom",
                    StepKind::Action {
                        action: failing_action(),
                        next: Some("finish".to_string()),
                        on_error: ErrorPolicy::Goto("recover".to_string()),
                    },
                ),
                log_step("recover", "recovered", Some("finish")),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&wf_goto.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.history[1].step_id, "recover");
}

#[tokio::test]
async fn test_missing_step_fails_execution() {
    let f = fixture();
    let workflow = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "dangling".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![log_step("start", "off we go", Some("nowhere"))],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&workflow.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("Step nowhere not found"));
}

#[tokio::test]
async fn test_sub_workflow_maps_input_and_output() {
    let f = fixture();
    let child = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "child".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "copy",
                    StepKind::Action {
                        action: ActionDef::SetContext {
                            values: [(
                                "childResult".to_string(),
                                ValueSource::field("childValue"),
                            )]
                            .into_iter()
                            .collect(),
                        },
                        next: Some("finish".to_string()),
                        on_error: ErrorPolicy::Fail,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();

    let parent = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "parent".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "delegate",
                    StepKind::SubWorkflow {
                        workflow_id: child.id.clone(),
                        input_mapping: [("childValue".to_string(), ValueSource::field("seed"))]
                            .into_iter()
                            .collect(),
                        output_mapping: [("result".to_string(), "childResult".to_string())]
                            .into_iter()
                            .collect(),
                        next: Some("finish".to_string()),
                        wait_for_completion: true,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();

    let execution = f
        .service
        .start_execution(&parent.id, Some(json!({"seed": 99})))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.context["result"], json!(99));

    // The child persisted independently with its parent pointer
    let children = f.service.list_executions(Some(&child.id)).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].parent_execution_id.as_deref(), Some(execution.id.as_str()));
    assert_eq!(children[0].status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_sub_workflow_failure_propagates_when_waiting() {
    let f = fixture();
    let child = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "doomed-child".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![step(
                "die",
                StepKind::End {
                    status: Some(tradewind_workflow::EndStatus::Failed),
                    reason: Some("nope".to_string()),
                },
            )],
            ..Default::default()
        })
        .await
        .unwrap();
    let parent = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "hopeful-parent".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "delegate",
                    StepKind::SubWorkflow {
                        workflow_id: child.id.clone(),
                        input_mapping: Default::default(),
                        output_mapping: Default::default(),
                        next: Some("finish".to_string()),
                        wait_for_completion: true,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&parent.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .as_deref()
        .is_some_and(|error| error.contains("Sub-workflow failed")));
}

#[tokio::test]
async fn test_fire_and_forget_sub_workflow_ignores_child_failure() {
    let f = fixture();
    let child = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "background-child".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![step(
                "die",
                StepKind::End {
                    status: Some(tradewind_workflow::EndStatus::Failed),
                    reason: None,
                },
            )],
            ..Default::default()
        })
        .await
        .unwrap();
    let parent = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "casual-parent".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "delegate",
                    StepKind::SubWorkflow {
                        workflow_id: child.id.clone(),
                        input_mapping: Default::default(),
                        output_mapping: Default::default(),
                        next: Some("finish".to_string()),
                        wait_for_completion: false,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&parent.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_cancel_is_rejected_on_terminal_executions() {
    let f = fixture();
    let workflow = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "pausing".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "wait",
                    StepKind::Pause {
                        reason: None,
                        next: Some("finish".to_string()),
                        resume_condition: None,
                        timeout_ms: None,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&workflow.id, None).await.unwrap();

    let cancelled = f.service.cancel_execution(&execution.id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert!(cancelled.current_step_id.is_none());

    let again = f.service.cancel_execution(&execution.id).await;
    assert!(matches!(again, Err(WorkflowError::AlreadyTerminal(_))));
}

#[tokio::test]
async fn test_inactive_workflow_cannot_start() {
    let f = fixture();
    let workflow = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "draft".to_string(),
            steps: vec![end_step("finish")],
            ..Default::default()
        })
        .await
        .unwrap();
    let result = f.service.start_execution(&workflow.id, None).await;
    assert!(matches!(result, Err(WorkflowError::WorkflowNotActive(_))));
}

#[tokio::test]
async fn test_context_mutations_visible_to_later_steps() {
    let f = fixture();
    f.storage.register_collection("orders", None).await;
    let workflow = f
        .service
        .create_workflow(CreateWorkflowInput {
            name: "threading".to_string(),
            status: Some(WorkflowStatus::Active),
            steps: vec![
                step(
                    "create",
                    StepKind::Action {
                        action: ActionDef::CreateEntity {
                            collection: "orders".to_string(),
                            fields: [("amount".to_string(), ValueSource::constant(json!(10)))]
                                .into_iter()
                                .collect(),
                            save_result_to: Some("order".to_string()),
                        },
                        next: Some("check".to_string()),
                        on_error: ErrorPolicy::Fail,
                    },
                ),
                step(
                    "check",
                    StepKind::Condition {
                        condition: Condition::Exists {
                            collection: "orders".to_string(),
                            filter: tradewind_core::condition::ExistsFilter {
                                field: "amount".to_string(),
                                op: CompareOp::Gte,
                                value: json!(10),
                            },
                        },
                        on_true: Some("finish".to_string()),
                        on_false: None,
                    },
                ),
                end_step("finish"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let execution = f.service.start_execution(&workflow.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.context["order"]["id"].is_string());
    // All three steps ran and the exists() query saw the created record
    assert_eq!(execution.history.len(), 3);
    let executions: Vec<Value> = f
        .storage
        .repository("workflow_executions")
        .await
        .unwrap()
        .find_all(None)
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
}
