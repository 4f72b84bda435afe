//! Workflow service: definition CRUD plus execution lifecycle
//!
//! The service owns validation and the active-status gate; the engine
//! underneath only ever sees well-formed definitions.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use tradewind_core::collaborators::{HttpClient, Logger, MessageHandler};
use tradewind_core::ids::new_id;
use tradewind_core::validation::{ValidationIssue, ValidationResult};
use tradewind_storage::Storage;

use crate::engine::{WorkflowEngine, WORKFLOWS};
use crate::error::WorkflowError;
use crate::types::{
    CreateWorkflowInput, UpdateWorkflowInput, Workflow, WorkflowExecution, WorkflowStatus,
};

/// Validate a workflow input document.
pub fn validate_workflow(input: &CreateWorkflowInput) -> ValidationResult {
    let mut errors = Vec::new();
    if input.name.trim().is_empty() {
        errors.push(ValidationIssue::required("name"));
    }
    if input.steps.is_empty() {
        errors.push(ValidationIssue::required("steps"));
    }
    for (index, step) in input.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            errors.push(ValidationIssue::required(format!("steps[{index}].id")));
        }
    }
    ValidationResult::from_errors(errors)
}

/// CRUD and execution surface for workflows.
pub struct WorkflowService {
    storage: Arc<dyn Storage>,
    engine: WorkflowEngine,
}

impl WorkflowService {
    pub fn new(
        storage: Arc<dyn Storage>,
        messages: Arc<dyn MessageHandler>,
        http: Arc<dyn HttpClient>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            engine: WorkflowEngine::new(storage.clone(), messages, http, logger),
            storage,
        }
    }

    /// Direct access to the engine, for callers that manage definitions
    /// themselves.
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    pub async fn create_workflow(
        &self,
        input: CreateWorkflowInput,
    ) -> Result<Workflow, WorkflowError> {
        let validation = validate_workflow(&input);
        if !validation.valid {
            return Err(WorkflowError::Invalid(validation.errors));
        }
        let now = Utc::now();
        let workflow = Workflow {
            id: new_id(),
            name: input.name,
            description: input.description,
            version: input.version.unwrap_or(1),
            status: input.status.unwrap_or(WorkflowStatus::Draft),
            trigger: input.trigger,
            steps: input.steps,
            initial_context: input.initial_context,
            created_at: now,
            updated_at: now,
        };
        let repository = self.storage.ensure_collection(WORKFLOWS).await;
        repository.create(encode(&workflow)?).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "created workflow");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, WorkflowError> {
        self.engine.get_workflow(id).await
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, WorkflowError> {
        let repository = self.storage.ensure_collection(WORKFLOWS).await;
        repository
            .find_all(None)
            .await?
            .into_iter()
            .map(|document| {
                serde_json::from_value(document).map_err(|e| WorkflowError::Corrupt(e.to_string()))
            })
            .collect()
    }

    /// Merge the provided fields over the stored definition and bump the
    /// version when the steps change.
    pub async fn update_workflow(
        &self,
        id: &str,
        input: UpdateWorkflowInput,
    ) -> Result<Workflow, WorkflowError> {
        let mut workflow = self
            .get_workflow(id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.to_string()))?;
        if let Some(name) = input.name {
            workflow.name = name;
        }
        if let Some(description) = input.description {
            workflow.description = Some(description);
        }
        if let Some(version) = input.version {
            workflow.version = version;
        }
        if let Some(status) = input.status {
            workflow.status = status;
        }
        if let Some(trigger) = input.trigger {
            workflow.trigger = Some(trigger);
        }
        if let Some(steps) = input.steps {
            if steps != workflow.steps {
                workflow.version += 1;
            }
            workflow.steps = steps;
        }
        if let Some(initial_context) = input.initial_context {
            workflow.initial_context = Some(initial_context);
        }

        let validation = validate_workflow(&CreateWorkflowInput {
            name: workflow.name.clone(),
            steps: workflow.steps.clone(),
            ..Default::default()
        });
        if !validation.valid {
            return Err(WorkflowError::Invalid(validation.errors));
        }

        workflow.updated_at = Utc::now();
        let repository = self.storage.ensure_collection(WORKFLOWS).await;
        repository.update(id, encode(&workflow)?).await?;
        Ok(workflow)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool, WorkflowError> {
        let repository = self.storage.ensure_collection(WORKFLOWS).await;
        Ok(repository.delete(id).await?)
    }

    // =========================================================================
    // Executions
    // =========================================================================

    /// Start an execution of an active workflow.
    pub async fn start_execution(
        &self,
        workflow_id: &str,
        input: Option<Value>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let workflow = self
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        if workflow.status != WorkflowStatus::Active {
            return Err(WorkflowError::WorkflowNotActive(workflow_id.to_string()));
        }
        self.engine.start_execution(&workflow, input, None).await
    }

    pub async fn resume_execution(
        &self,
        execution_id: &str,
        input: Option<Value>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        self.engine.resume_execution(execution_id, input).await
    }

    pub async fn cancel_execution(
        &self,
        execution_id: &str,
    ) -> Result<WorkflowExecution, WorkflowError> {
        self.engine.cancel_execution(execution_id).await
    }

    pub async fn get_execution(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowExecution>, WorkflowError> {
        self.engine.get_execution(id).await
    }

    pub async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        self.engine.list_executions(workflow_id).await
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, WorkflowError> {
    serde_json::to_value(value).map_err(|e| WorkflowError::Corrupt(e.to_string()))
}
