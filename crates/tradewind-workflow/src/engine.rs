//! Workflow engine
//!
//! Drives a `WorkflowExecution` through its workflow's steps one at a
//! time. Each step appends a history entry, mutates the execution, and is
//! followed by a save through the executions collection, so a crash or
//! pause always leaves a consistent, resumable document behind.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tradewind_core::collaborators::{HttpClient, Logger, MessageHandler};
use tradewind_core::ids::new_id;
use tradewind_core::path::{get_path, set_path};
use tradewind_storage::{Filter, Storage};

use crate::actions::ActionExecutor;
use crate::condition::ConditionEvaluator;
use crate::error::WorkflowError;
use crate::types::{
    EndStatus, ErrorPolicy, ExecutionStatus, HistoryEntry, HistoryStatus, StepKind, Workflow,
    WorkflowExecution, WorkflowStep,
};

pub(crate) const WORKFLOWS: &str = "workflows";
pub(crate) const EXECUTIONS: &str = "workflow_executions";

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on steps interpreted in one run, as a cycle backstop.
    pub max_steps_per_run: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: 10_000,
        }
    }
}

/// What one dispatched step did, for the history entry.
struct StepDisposition {
    failed: bool,
    error: Option<String>,
}

impl StepDisposition {
    fn ok() -> Self {
        Self {
            failed: false,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            failed: true,
            error: Some(error.into()),
        }
    }
}

/// The step-machine interpreter.
pub struct WorkflowEngine {
    storage: Arc<dyn Storage>,
    actions: ActionExecutor,
    conditions: ConditionEvaluator,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        messages: Arc<dyn MessageHandler>,
        http: Arc<dyn HttpClient>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            actions: ActionExecutor::new(storage.clone(), messages, http, logger),
            conditions: ConditionEvaluator::new(storage.clone()),
            storage,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create an execution for `workflow` and run it until it completes,
    /// fails, or pauses.
    pub async fn start_execution(
        &self,
        workflow: &Workflow,
        input: Option<Value>,
        parent_execution_id: Option<String>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let mut context = workflow
            .initial_context
            .clone()
            .unwrap_or_else(|| json!({}));
        if let Some(input) = input {
            merge_context(&mut context, input);
        }
        let now = Utc::now();
        let mut execution = WorkflowExecution {
            id: new_id(),
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version,
            parent_execution_id,
            status: ExecutionStatus::Pending,
            current_step_id: workflow.steps.first().map(|step| step.id.clone()),
            context,
            history: Vec::new(),
            error: None,
            started_at: now,
            paused_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.save_execution(&mut execution, true).await?;
        info!(execution_id = %execution.id, workflow_id = %workflow.id, "execution started");
        self.run(&mut execution, workflow).await?;
        Ok(execution)
    }

    /// Resume a paused execution, merging `input` into its context and
    /// following the pause step's `next`.
    pub async fn resume_execution(
        &self,
        execution_id: &str,
        input: Option<Value>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let mut execution = self
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        if execution.status != ExecutionStatus::Paused {
            return Err(WorkflowError::NotPaused(execution_id.to_string()));
        }
        let workflow = self
            .get_workflow(&execution.workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(execution.workflow_id.clone()))?;

        if let Some(input) = input {
            merge_context(&mut execution.context, input);
        }
        // Follow the pause step's `next`
        let next = execution
            .current_step_id
            .as_ref()
            .and_then(|id| workflow.steps.iter().find(|step| &step.id == id))
            .and_then(|step| match &step.kind {
                StepKind::Pause { next, .. } => next.clone(),
                _ => None,
            });
        execution.status = ExecutionStatus::Running;
        execution.paused_at = None;
        match next {
            Some(next) => execution.current_step_id = Some(next),
            None => self.complete(&mut execution),
        }
        self.save_execution(&mut execution, false).await?;
        info!(execution_id = %execution.id, "execution resumed");
        self.run(&mut execution, &workflow).await?;
        Ok(execution)
    }

    /// Cancel a non-terminal execution.
    pub async fn cancel_execution(
        &self,
        execution_id: &str,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let mut execution = self
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        if execution.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(execution_id.to_string()));
        }
        execution.status = ExecutionStatus::Cancelled;
        execution.current_step_id = None;
        execution.completed_at = Some(Utc::now());
        self.save_execution(&mut execution, false).await?;
        info!(execution_id = %execution.id, "execution cancelled");
        Ok(execution)
    }

    // =========================================================================
    // The step loop
    // =========================================================================

    /// Interpret steps while the execution is running. Returns with the
    /// execution in `running`-exited state: terminal or paused.
    pub async fn run(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
    ) -> Result<(), WorkflowError> {
        if execution.status == ExecutionStatus::Pending {
            execution.status = ExecutionStatus::Running;
        }
        let mut steps_taken = 0usize;

        while execution.status == ExecutionStatus::Running {
            let Some(step_id) = execution.current_step_id.clone() else {
                self.complete(execution);
                self.save_execution(execution, false).await?;
                break;
            };
            let Some(step) = workflow.steps.iter().find(|step| step.id == step_id) else {
                self.fail(execution, format!("Step {step_id} not found"));
                self.save_execution(execution, false).await?;
                break;
            };

            steps_taken += 1;
            if steps_taken > self.config.max_steps_per_run {
                self.fail(
                    execution,
                    format!("step limit exceeded ({})", self.config.max_steps_per_run),
                );
                self.save_execution(execution, false).await?;
                break;
            }

            let started_at = Utc::now();
            execution.history.push(HistoryEntry {
                step_id: step.id.clone(),
                step_type: Some(step.kind.kind_name().to_string()),
                status: HistoryStatus::Started,
                started_at,
                completed_at: None,
                duration_ms: None,
                error: None,
            });
            debug!(execution_id = %execution.id, step_id = %step.id, "dispatching step");

            let disposition = self.dispatch(execution, step).await;

            let completed_at = Utc::now();
            if let Some(entry) = execution.history.last_mut() {
                entry.status = if disposition.failed {
                    HistoryStatus::Failed
                } else {
                    HistoryStatus::Completed
                };
                entry.completed_at = Some(completed_at);
                entry.duration_ms = Some((completed_at - started_at).num_milliseconds());
                entry.error = disposition.error;
            }
            self.save_execution(execution, false).await?;

            if execution.status == ExecutionStatus::Paused {
                debug!(execution_id = %execution.id, step_id = %step.id, "execution paused");
                break;
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        execution: &mut WorkflowExecution,
        step: &WorkflowStep,
    ) -> StepDisposition {
        match &step.kind {
            StepKind::Condition {
                condition,
                on_true,
                on_false,
            } => {
                let matched = self.conditions.evaluate(condition, &execution.context).await;
                let branch = if matched { on_true } else { on_false };
                match branch {
                    Some(next) => execution.current_step_id = Some(next.clone()),
                    None => self.complete(execution),
                }
                StepDisposition::ok()
            }

            StepKind::Action {
                action,
                next,
                on_error,
            } => {
                let result = self.actions.execute(action, &mut execution.context).await;
                if result.success {
                    self.advance(execution, next);
                    return StepDisposition::ok();
                }
                let message = result
                    .error
                    .unwrap_or_else(|| "action failed".to_string());
                warn!(execution_id = %execution.id, step_id = %step.id, %message, "action failed");
                match on_error {
                    ErrorPolicy::Fail => {
                        self.fail(execution, message.clone());
                        StepDisposition::failed(message)
                    }
                    ErrorPolicy::Continue => {
                        self.advance(execution, next);
                        StepDisposition::failed(message)
                    }
                    ErrorPolicy::Goto(recovery) => {
                        execution.current_step_id = Some(recovery.clone());
                        StepDisposition::failed(message)
                    }
                }
            }

            StepKind::Pause {
                next,
                resume_condition,
                reason,
                ..
            } => {
                if let Some(condition) = resume_condition {
                    if self.conditions.evaluate(condition, &execution.context).await {
                        self.advance(execution, next);
                        return StepDisposition::ok();
                    }
                }
                debug!(execution_id = %execution.id, reason = reason.as_deref().unwrap_or(""), "pausing");
                execution.status = ExecutionStatus::Paused;
                execution.paused_at = Some(Utc::now());
                // current_step_id stays on the pause step for resume
                StepDisposition::ok()
            }

            StepKind::SubWorkflow {
                workflow_id,
                input_mapping,
                output_mapping,
                next,
                wait_for_completion,
            } => {
                let child_workflow = match self.get_workflow(workflow_id).await {
                    Ok(Some(child)) => child,
                    Ok(None) => {
                        let message = format!("Sub-workflow {workflow_id} not found");
                        self.fail(execution, message.clone());
                        return StepDisposition::failed(message);
                    }
                    Err(error) => {
                        let message = error.to_string();
                        self.fail(execution, message.clone());
                        return StepDisposition::failed(message);
                    }
                };

                let mut child_input = json!({});
                for (target, source) in input_mapping {
                    set_path(&mut child_input, target, source.resolve(&execution.context));
                }

                if !wait_for_completion {
                    // Fire and forget: the child runs to its own terminal
                    // state, its outcome never reaches the parent
                    let _ = self
                        .start_boxed(&child_workflow, child_input, execution.id.clone())
                        .await;
                    self.advance(execution, next);
                    return StepDisposition::ok();
                }

                execution.status = ExecutionStatus::WaitingForSubWorkflow;
                let child = match self
                    .start_boxed(&child_workflow, child_input, execution.id.clone())
                    .await
                {
                    Ok(child) => child,
                    Err(error) => {
                        let message = format!("Sub-workflow failed to start: {error}");
                        self.fail(execution, message.clone());
                        return StepDisposition::failed(message);
                    }
                };
                match child.status {
                    ExecutionStatus::Completed => {
                        for (target, source_path) in output_mapping {
                            let value = get_path(&child.context, source_path)
                                .cloned()
                                .unwrap_or(Value::Null);
                            set_path(&mut execution.context, target, value);
                        }
                        execution.status = ExecutionStatus::Running;
                        self.advance(execution, next);
                        StepDisposition::ok()
                    }
                    other => {
                        let message = match child.error {
                            Some(child_error) => format!("Sub-workflow failed: {child_error}"),
                            None => format!(
                                "Sub-workflow did not complete (status {})",
                                serde_json::to_value(other)
                                    .ok()
                                    .and_then(|v| v.as_str().map(str::to_string))
                                    .unwrap_or_default()
                            ),
                        };
                        self.fail(execution, message.clone());
                        StepDisposition::failed(message)
                    }
                }
            }

            StepKind::End { status, reason } => {
                match status.unwrap_or(EndStatus::Completed) {
                    EndStatus::Completed => self.complete(execution),
                    EndStatus::Failed => self.fail(
                        execution,
                        reason
                            .clone()
                            .unwrap_or_else(|| "workflow ended with failure".to_string()),
                    ),
                }
                StepDisposition::ok()
            }
        }
    }

    /// Boxed recursion point for sub-workflow invocation.
    fn start_boxed<'a>(
        &'a self,
        workflow: &'a Workflow,
        input: Value,
        parent_execution_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<WorkflowExecution, WorkflowError>> + Send + 'a>> {
        Box::pin(self.start_execution(workflow, Some(input), Some(parent_execution_id)))
    }

    fn advance(&self, execution: &mut WorkflowExecution, next: &Option<String>) {
        match next {
            Some(next) => execution.current_step_id = Some(next.clone()),
            None => self.complete(execution),
        }
    }

    fn complete(&self, execution: &mut WorkflowExecution) {
        execution.status = ExecutionStatus::Completed;
        execution.current_step_id = None;
        execution.completed_at = Some(Utc::now());
    }

    fn fail(&self, execution: &mut WorkflowExecution, message: impl Into<String>) {
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(message.into());
        execution.current_step_id = None;
        execution.completed_at = Some(Utc::now());
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, WorkflowError> {
        let repository = self.storage.ensure_collection(WORKFLOWS).await;
        match repository.find_by_id(id).await? {
            Some(document) => Ok(Some(decode(document)?)),
            None => Ok(None),
        }
    }

    pub async fn get_execution(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowExecution>, WorkflowError> {
        let repository = self.storage.ensure_collection(EXECUTIONS).await;
        match repository.find_by_id(id).await? {
            Some(document) => Ok(Some(decode(document)?)),
            None => Ok(None),
        }
    }

    /// Executions, optionally restricted to one workflow.
    pub async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        let repository = self.storage.ensure_collection(EXECUTIONS).await;
        let filter = workflow_id.map(|id| Filter::eq("workflowId", Value::String(id.to_string())));
        repository
            .find_all(filter.as_ref())
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn save_execution(
        &self,
        execution: &mut WorkflowExecution,
        create: bool,
    ) -> Result<(), WorkflowError> {
        execution.updated_at = Utc::now();
        let document =
            serde_json::to_value(&*execution).map_err(|e| WorkflowError::Corrupt(e.to_string()))?;
        let repository = self.storage.ensure_collection(EXECUTIONS).await;
        if create {
            repository.create(document).await?;
        } else {
            repository.update(&execution.id, document).await?;
        }
        Ok(())
    }
}

/// Shallow-merge `patch` into `context` (object keys win over existing).
fn merge_context(context: &mut Value, patch: Value) {
    match (context.as_object_mut(), patch) {
        (Some(target), Value::Object(source)) => {
            for (key, value) in source {
                target.insert(key, value);
            }
        }
        (_, patch) => *context = patch,
    }
}

fn decode<T: serde::de::DeserializeOwned>(document: Value) -> Result<T, WorkflowError> {
    serde_json::from_value(document).map_err(|e| WorkflowError::Corrupt(e.to_string()))
}
