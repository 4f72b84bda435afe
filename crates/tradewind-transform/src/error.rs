//! Transform engine errors

use tradewind_core::validation::ValidationIssue;
use tradewind_storage::StoreError;

/// Errors from pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Pipeline not found
    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    /// Pipeline exists but is not runnable
    #[error("pipeline {0} is not active")]
    PipelineNotActive(String),

    /// Run not found
    #[error("pipeline run not found: {0}")]
    RunNotFound(String),

    /// Pipeline input failed validation
    #[error("pipeline input is invalid")]
    Invalid(Vec<ValidationIssue>),

    /// A step failed; carries the step id and a human-readable message
    #[error("step {step_id}: {message}")]
    Step { step_id: String, message: String },

    /// Store error outside any step
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Run/pipeline document could not be decoded
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

impl TransformError {
    /// Wrap a message with its step context.
    pub fn step(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step_id: step_id.into(),
            message: message.into(),
        }
    }
}
