//! Pipeline orchestration
//!
//! Sequences steps in declared order, gates each step on its `dependsOn`
//! results, applies the per-run failure policy, persists the run after
//! every step, and garbage-collects `_temp_`/`_preview_` collections after
//! the run regardless of outcome.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use tradewind_core::ids::new_id;
use tradewind_storage::{Filter, Storage};

use crate::error::TransformError;
use crate::executor::StepExecutor;
use crate::types::{
    CreatePipelineInput, PipelineRun, PipelineStatus, RunStatus, StepResult, StepStatus,
    TransformPipeline, TransformStep, UpdatePipelineInput,
};
use crate::validate::validate_pipeline;

const PIPELINES: &str = "transform_pipelines";
const RUNS: &str = "pipeline_runs";

/// Reason recorded on steps skipped over unmet dependencies.
const DEPENDENCIES_NOT_MET: &str = "Dependencies not met";

/// Default row cap for previews.
const PREVIEW_LIMIT: usize = 100;

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Keep executing after a failed step.
    pub continue_on_error: bool,
}

/// Rows produced by a preview execution.
#[derive(Debug, Clone, Default)]
pub struct PreviewResult {
    pub rows: Vec<Value>,
}

/// CRUD plus orchestration for transform pipelines.
pub struct PipelineService {
    storage: Arc<dyn Storage>,
    executor: StepExecutor,
}

impl PipelineService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            executor: StepExecutor::new(storage.clone()),
            storage,
        }
    }

    // =========================================================================
    // Pipeline CRUD
    // =========================================================================

    /// Validate and persist a new pipeline. Steps without ids get
    /// positional ones.
    pub async fn create_pipeline(
        &self,
        input: CreatePipelineInput,
    ) -> Result<TransformPipeline, TransformError> {
        let validation = validate_pipeline(&input);
        if !validation.valid {
            return Err(TransformError::Invalid(validation.errors));
        }
        let now = Utc::now();
        let mut steps = input.steps;
        for (index, step) in steps.iter_mut().enumerate() {
            if step.id.trim().is_empty() {
                step.id = format!("step-{}", index + 1);
            }
        }
        let pipeline = TransformPipeline {
            id: new_id(),
            name: input.name,
            description: input.description,
            steps,
            status: input.status.unwrap_or(PipelineStatus::Draft),
            schedule: input.schedule,
            created_at: now,
            updated_at: now,
        };
        let document = encode(&pipeline)?;
        self.storage
            .ensure_collection(PIPELINES)
            .await
            .create(document)
            .await?;
        info!(pipeline_id = %pipeline.id, name = %pipeline.name, "created pipeline");
        Ok(pipeline)
    }

    pub async fn get_pipeline(
        &self,
        id: &str,
    ) -> Result<Option<TransformPipeline>, TransformError> {
        let repository = self.storage.ensure_collection(PIPELINES).await;
        match repository.find_by_id(id).await? {
            Some(document) => Ok(Some(decode(document)?)),
            None => Ok(None),
        }
    }

    pub async fn list_pipelines(&self) -> Result<Vec<TransformPipeline>, TransformError> {
        let repository = self.storage.ensure_collection(PIPELINES).await;
        repository
            .find_all(None)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Merge the provided fields over the stored pipeline and revalidate.
    pub async fn update_pipeline(
        &self,
        id: &str,
        input: UpdatePipelineInput,
    ) -> Result<TransformPipeline, TransformError> {
        let mut pipeline = self
            .get_pipeline(id)
            .await?
            .ok_or_else(|| TransformError::PipelineNotFound(id.to_string()))?;
        if let Some(name) = input.name {
            pipeline.name = name;
        }
        if let Some(description) = input.description {
            pipeline.description = Some(description);
        }
        if let Some(steps) = input.steps {
            pipeline.steps = steps;
        }
        if let Some(status) = input.status {
            pipeline.status = status;
        }
        if let Some(schedule) = input.schedule {
            pipeline.schedule = Some(schedule);
        }
        let validation = validate_pipeline(&CreatePipelineInput {
            name: pipeline.name.clone(),
            description: pipeline.description.clone(),
            steps: pipeline.steps.clone(),
            status: Some(pipeline.status),
            schedule: pipeline.schedule.clone(),
        });
        if !validation.valid {
            return Err(TransformError::Invalid(validation.errors));
        }
        pipeline.updated_at = Utc::now();
        let repository = self.storage.ensure_collection(PIPELINES).await;
        repository.update(id, encode(&pipeline)?).await?;
        Ok(pipeline)
    }

    pub async fn delete_pipeline(&self, id: &str) -> Result<bool, TransformError> {
        let repository = self.storage.ensure_collection(PIPELINES).await;
        Ok(repository.delete(id).await?)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Execute an active pipeline and return the finished run document.
    pub async fn run_pipeline(
        &self,
        id: &str,
        options: RunOptions,
    ) -> Result<PipelineRun, TransformError> {
        let pipeline = self
            .get_pipeline(id)
            .await?
            .ok_or_else(|| TransformError::PipelineNotFound(id.to_string()))?;
        if pipeline.status != PipelineStatus::Active {
            return Err(TransformError::PipelineNotActive(id.to_string()));
        }

        let mut run = PipelineRun {
            id: new_id(),
            pipeline_id: pipeline.id.clone(),
            status: RunStatus::Running,
            step_results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        };
        let runs = self.storage.ensure_collection(RUNS).await;
        runs.create(encode(&run)?).await?;
        info!(run_id = %run.id, pipeline_id = %pipeline.id, "pipeline run started");

        let outcome = self.run_steps(&pipeline, &mut run, options).await;

        let any_failed = run
            .step_results
            .iter()
            .any(|result| result.status == StepStatus::Failed);
        run.status = if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        run.completed_at = Some(Utc::now());
        runs.update(&run.id, encode(&run)?).await?;

        // Temp collections go away regardless of outcome
        self.collect_garbage().await;

        outcome?;
        info!(run_id = %run.id, status = ?run.status, "pipeline run finished");
        Ok(run)
    }

    async fn run_steps(
        &self,
        pipeline: &TransformPipeline,
        run: &mut PipelineRun,
        options: RunOptions,
    ) -> Result<(), TransformError> {
        let mut ordered = pipeline.steps.clone();
        ordered.sort_by_key(|step| step.order);

        let runs = self.storage.ensure_collection(RUNS).await;
        let mut completed: HashSet<String> = HashSet::new();

        for step in &ordered {
            let started_at = Utc::now();
            let dependencies_met = step
                .depends_on
                .iter()
                .all(|dependency| completed.contains(dependency));
            let result = if !dependencies_met {
                warn!(step_id = %step.id, "skipping step, dependencies not met");
                StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Skipped,
                    input_rows: 0,
                    output_rows: 0,
                    output_collection: None,
                    error: Some(DEPENDENCIES_NOT_MET.to_string()),
                    started_at,
                    completed_at: started_at,
                    duration_ms: 0,
                }
            } else {
                match self.executor.execute(step).await {
                    Ok(outcome) => {
                        completed.insert(step.id.clone());
                        let completed_at = Utc::now();
                        StepResult {
                            step_id: step.id.clone(),
                            status: StepStatus::Completed,
                            input_rows: outcome.input_rows,
                            output_rows: outcome.output_rows,
                            output_collection: Some(outcome.output_collection),
                            error: None,
                            started_at,
                            completed_at,
                            duration_ms: (completed_at - started_at).num_milliseconds(),
                        }
                    }
                    Err(error) => {
                        let message = match &error {
                            TransformError::Step { message, .. } => message.clone(),
                            other => other.to_string(),
                        };
                        warn!(step_id = %step.id, %message, "step failed");
                        let completed_at = Utc::now();
                        StepResult {
                            step_id: step.id.clone(),
                            status: StepStatus::Failed,
                            input_rows: 0,
                            output_rows: 0,
                            output_collection: None,
                            error: Some(message),
                            started_at,
                            completed_at,
                            duration_ms: (completed_at - started_at).num_milliseconds(),
                        }
                    }
                }
            };
            let failed = result.status == StepStatus::Failed;
            run.step_results.push(result);
            runs.update(&run.id, encode(&*run)?).await?;
            if failed && !options.continue_on_error {
                break;
            }
        }
        Ok(())
    }

    /// Cancellation hook. The core executes runs synchronously, so by the
    /// time a caller holds a run id the run is terminal; this returns the
    /// stored run untouched. Asynchronous deployments may check for a
    /// cancelled status between steps.
    pub async fn cancel_run(&self, id: &str) -> Result<PipelineRun, TransformError> {
        self.get_run(id)
            .await?
            .ok_or_else(|| TransformError::RunNotFound(id.to_string()))
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<PipelineRun>, TransformError> {
        let repository = self.storage.ensure_collection(RUNS).await;
        match repository.find_by_id(id).await? {
            Some(document) => Ok(Some(decode(document)?)),
            None => Ok(None),
        }
    }

    /// Runs, optionally restricted to one pipeline.
    pub async fn list_runs(
        &self,
        pipeline_id: Option<&str>,
    ) -> Result<Vec<PipelineRun>, TransformError> {
        let repository = self.storage.ensure_collection(RUNS).await;
        let filter = pipeline_id.map(|id| Filter::eq("pipelineId", Value::String(id.to_string())));
        repository
            .find_all(filter.as_ref())
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    // =========================================================================
    // Preview
    // =========================================================================

    /// Execute one step against a throwaway `_preview_` collection, return
    /// up to `limit` rows, and put the store back exactly as it was.
    /// Errors are swallowed and reported as an empty result.
    pub async fn preview_step(
        &self,
        mut step: TransformStep,
        limit: Option<usize>,
    ) -> PreviewResult {
        if step.id.trim().is_empty() {
            step.id = new_id();
        }
        let preview_collection = format!("_preview_{}", step.id);
        match step.config.as_object_mut() {
            Some(config) => {
                config.insert(
                    "output".to_string(),
                    Value::String(preview_collection.clone()),
                );
            }
            None => return PreviewResult::default(),
        }

        let rows = match self.executor.execute(&step).await {
            Ok(_) => match self.storage.repository(&preview_collection).await {
                Ok(repository) => repository
                    .find_all(None)
                    .await
                    .map(|rows| {
                        rows.into_iter()
                            .take(limit.unwrap_or(PREVIEW_LIMIT))
                            .collect()
                    })
                    .unwrap_or_default(),
                Err(_) => Vec::new(),
            },
            Err(error) => {
                debug!(step_id = %step.id, %error, "preview failed");
                Vec::new()
            }
        };
        self.storage.drop_collection(&preview_collection).await;
        PreviewResult { rows }
    }

    async fn collect_garbage(&self) {
        for name in self.storage.collections().await {
            if name.starts_with("_temp_") || name.starts_with("_preview_") {
                debug!(collection = %name, "dropping temp collection");
                self.storage.drop_collection(&name).await;
            }
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, TransformError> {
    serde_json::to_value(value).map_err(|e| TransformError::Corrupt(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(document: Value) -> Result<T, TransformError> {
    serde_json::from_value(document).map_err(|e| TransformError::Corrupt(e.to_string()))
}
