//! # Tradewind Core
//!
//! Shared substrate for the Tradewind data-plane engines.
//!
//! This crate holds everything the workflow, transform, and discount engines
//! have in common but none of their semantics:
//!
//! - **Paths**: dotted/bracketed path resolution and creation over
//!   `serde_json::Value` records ([`path`])
//! - **Coercion**: the loose numeric/string coercion rules all comparisons
//!   share ([`coerce`])
//! - **Expressions**: the pure tree-walk expression evaluator ([`expression`])
//! - **Conditions**: the shared condition shape with compare semantics
//!   ([`condition`]); storage-backed `exists` is wired up by the engines
//! - **Collaborators**: the pluggable sink traits for messages, outbound
//!   HTTP, and logging ([`collaborators`])
//! - **Validation**: the wire-visible validation issue shape ([`validation`])

pub mod coerce;
pub mod collaborators;
pub mod condition;
pub mod expression;
pub mod ids;
pub mod path;
pub mod validation;

pub use coerce::{as_f64, preview_json, to_display_string, values_equal};
pub use collaborators::{
    CannedHttpClient, CollaboratorError, HttpClient, HttpResponse, LogLevel, Logger,
    MessageHandler, RecordingLogger, RecordingMessageHandler, ReqwestHttpClient, TracingLogger,
};
pub use condition::{compare, evaluate_condition, CompareOp, Condition, ExistsFilter, ValueSource};
pub use expression::{evaluate, ArrayOp, DateOp, DateUnit, Expression, MathOp, StringOp};
pub use ids::new_id;
pub use path::{get_path, set_path};
pub use validation::{ValidationIssue, ValidationResult, REQUIRED_FIELD};
