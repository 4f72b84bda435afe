//! # Tradewind Transform
//!
//! The transform pipeline engine: a staged data-flow executor over store
//! collections.
//!
//! A pipeline is an ordered list of steps, each one of twelve operators
//! (filter, map, aggregate, join, lookup, union, deduplicate, sort, limit,
//! pivot, unpivot, flatten). Every step reads from named source
//! collection(s) and rewrites its named output collection. The
//! [`PipelineService`] sequences steps, honors `dependsOn` chains, applies
//! the per-run failure policy, and garbage-collects `_temp_`/`_preview_`
//! collections after every run.

pub mod conditions;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod types;
pub mod validate;

pub use conditions::{FieldCondition, FieldOp, FilterMode};
pub use error::TransformError;
pub use executor::{StepExecutor, StepOutcome};
pub use pipeline::{PipelineService, PreviewResult, RunOptions};
pub use types::{
    CreatePipelineInput, PipelineRun, PipelineStatus, RunStatus, StepResult, StepStatus, StepType,
    TransformPipeline, TransformStep, UpdatePipelineInput,
};
pub use validate::validate_pipeline;
