//! Workflow, step, action, and execution documents

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use tradewind_core::collaborators::LogLevel;
use tradewind_core::condition::{Condition, ValueSource};

/// Workflow lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Archived,
}

/// Trigger configuration. Accepted and persisted; dispatch belongs to an
/// external scheduler, not to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerConfig {
    Manual,
    Event { event: String },
    Schedule { schedule: String },
    EntityChange {
        collection: String,
        #[serde(default)]
        operations: Vec<String>,
    },
}

/// What to do when an action step fails: fail the execution, continue to
/// `next`, or jump to a recovery step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    Fail,
    Continue,
    Goto(String),
}

impl Serialize for ErrorPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fail => serializer.serialize_str("fail"),
            Self::Continue => serializer.serialize_str("continue"),
            Self::Goto(step_id) => serializer.serialize_str(step_id),
        }
    }
}

impl<'de> Deserialize<'de> for ErrorPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "fail" => Self::Fail,
            "continue" => Self::Continue,
            _ => Self::Goto(raw),
        })
    }
}

/// Terminal status an `end` step can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndStatus {
    Completed,
    Failed,
}

/// Declarative side-effecting action. Inputs are constants or field
/// references resolved against the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ActionDef {
    SendMessage {
        channel: String,
        recipient: ValueSource,
        message: ValueSource,
        #[serde(default)]
        template: Option<String>,
    },
    CreateEntity {
        collection: String,
        #[serde(default)]
        fields: IndexMap<String, ValueSource>,
        #[serde(default)]
        save_result_to: Option<String>,
    },
    UpdateEntity {
        collection: String,
        entity_id: ValueSource,
        #[serde(default)]
        fields: IndexMap<String, ValueSource>,
        #[serde(default)]
        save_result_to: Option<String>,
    },
    DeleteEntity {
        collection: String,
        entity_id: ValueSource,
    },
    SetContext {
        #[serde(default)]
        values: IndexMap<String, ValueSource>,
    },
    HttpCall {
        method: String,
        url: ValueSource,
        #[serde(default)]
        headers: IndexMap<String, ValueSource>,
        #[serde(default)]
        body: Option<ValueSource>,
        #[serde(default)]
        save_result_to: Option<String>,
    },
    Log {
        #[serde(default)]
        level: LogLevel,
        message: ValueSource,
        #[serde(default)]
        data: Option<ValueSource>,
    },
}

fn default_true() -> bool {
    true
}

/// The step variants the engine interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepKind {
    /// Branch on a condition; a null branch terminates the execution as
    /// completed.
    Condition {
        condition: Condition,
        #[serde(default)]
        on_true: Option<String>,
        #[serde(default)]
        on_false: Option<String>,
    },
    Action {
        action: ActionDef,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        on_error: ErrorPolicy,
    },
    /// Suspend until `resumeExecution`, unless `resumeCondition` already
    /// holds. `timeoutMs` is persisted for an external timer; the engine
    /// does not implement wall-clock expiry.
    Pause {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        resume_condition: Option<Condition>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// Invoke another workflow. `inputMapping` builds the child context
    /// from the parent's; `outputMapping` copies child context paths back
    /// into the parent after a waited-for child completes.
    SubWorkflow {
        workflow_id: String,
        #[serde(default)]
        input_mapping: IndexMap<String, ValueSource>,
        #[serde(default)]
        output_mapping: IndexMap<String, String>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default = "default_true")]
        wait_for_completion: bool,
    },
    End {
        #[serde(default)]
        status: Option<EndStatus>,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl StepKind {
    /// Wire name of the variant, recorded in history entries.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Condition { .. } => "condition",
            Self::Action { .. } => "action",
            Self::Pause { .. } => "pause",
            Self::SubWorkflow { .. } => "subWorkflow",
            Self::End { .. } => "end",
        }
    }
}

/// One step of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

fn default_version() -> i64 {
    1
}

/// A stored workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: i64,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub initial_context: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub initial_context: Option<Value>,
}

/// Input for updating a workflow; absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkflowInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    #[serde(default)]
    pub steps: Option<Vec<WorkflowStep>>,
    #[serde(default)]
    pub initial_context: Option<Value>,
}

/// Execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    WaitingForSubWorkflow,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-step history state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

/// Outcome record for one step invocation. History is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub step_id: String,
    #[serde(default)]
    pub step_type: Option<String>,
    pub status: HistoryStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A stored execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: i64,
    #[serde(default)]
    pub parent_execution_id: Option<String>,
    pub status: ExecutionStatus,
    /// Null at terminal states; at `paused` it names the pause step.
    #[serde(default)]
    pub current_step_id: Option<String>,
    pub context: Value,
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_json_shape() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "check",
            "type": "condition",
            "condition": {
                "type": "compare",
                "left": {"source": "field", "path": "value"},
                "op": ">",
                "right": {"source": "constant", "value": 10},
            },
            "onTrue": "pass",
            "onFalse": "fail",
        }))
        .unwrap();
        assert_eq!(step.kind.kind_name(), "condition");
        match &step.kind {
            StepKind::Condition { on_true, on_false, .. } => {
                assert_eq!(on_true.as_deref(), Some("pass"));
                assert_eq!(on_false.as_deref(), Some("fail"));
            }
            other => panic!("expected condition step, got {other:?}"),
        }
    }

    #[test]
    fn test_error_policy_round_trip() {
        for (raw, expected) in [
            (json!("fail"), ErrorPolicy::Fail),
            (json!("continue"), ErrorPolicy::Continue),
            (json!("recover"), ErrorPolicy::Goto("recover".to_string())),
        ] {
            let policy: ErrorPolicy = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(policy, expected);
            assert_eq!(serde_json::to_value(&policy).unwrap(), raw);
        }
    }

    #[test]
    fn test_sub_workflow_defaults_to_waiting() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "child",
            "type": "subWorkflow",
            "workflowId": "wf-2",
        }))
        .unwrap();
        match step.kind {
            StepKind::SubWorkflow { wait_for_completion, .. } => assert!(wait_for_completion),
            other => panic!("expected subWorkflow step, got {other:?}"),
        }
    }

    #[test]
    fn test_execution_status_wire_values() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::WaitingForSubWorkflow).unwrap(),
            json!("waitingForSubWorkflow")
        );
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
    }
}
