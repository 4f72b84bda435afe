//! # Tradewind Workflow
//!
//! Deterministic step-machine interpreter for long-lived executions.
//!
//! A workflow is an ordered list of tagged steps: condition branches,
//! side-effecting actions, pause points, sub-workflow invocations, and
//! explicit ends. The [`WorkflowEngine`] drives a [`WorkflowExecution`]
//! through them one step at a time, appending a history entry per step and
//! persisting the execution after every transition. Given the same
//! definition, initial context, and collaborator responses, a run always
//! produces the same history and terminal state.

pub mod actions;
pub mod condition;
pub mod engine;
pub mod error;
pub mod service;
pub mod types;

pub use actions::{ActionExecutor, ActionResult};
pub use condition::ConditionEvaluator;
pub use engine::{EngineConfig, WorkflowEngine};
pub use error::WorkflowError;
pub use service::WorkflowService;
pub use types::{
    ActionDef, CreateWorkflowInput, EndStatus, ErrorPolicy, ExecutionStatus, HistoryEntry,
    HistoryStatus, StepKind, TriggerConfig, UpdateWorkflowInput, Workflow, WorkflowExecution,
    WorkflowStatus, WorkflowStep,
};
