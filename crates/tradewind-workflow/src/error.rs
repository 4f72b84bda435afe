//! Workflow engine errors

use tradewind_core::validation::ValidationIssue;
use tradewind_storage::StoreError;

/// Errors from workflow operations.
///
/// Step-level failures do not surface here — they fail the containing
/// execution and are recorded in its history.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow exists but is not startable
    #[error("workflow {0} is not active")]
    WorkflowNotActive(String),

    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// Resume called on an execution that is not paused
    #[error("execution {0} is not paused")]
    NotPaused(String),

    /// Cancel called on an already-terminal execution
    #[error("execution {0} already finished")]
    AlreadyTerminal(String),

    /// Workflow input failed validation
    #[error("workflow input is invalid")]
    Invalid(Vec<ValidationIssue>),

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored document could not be decoded
    #[error("corrupt document: {0}")]
    Corrupt(String),
}
