//! Wire-visible validation shapes
//!
//! Validation failures are collected eagerly and surfaced as a structured
//! list that blocks creation or execution. The `REQUIRED_FIELD` code and
//! the `field` path are part of the wire contract.

use serde::{Deserialize, Serialize};

/// Code carried by missing-required-field issues.
pub const REQUIRED_FIELD: &str = "REQUIRED_FIELD";

/// One validation finding, anchored to a field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    /// A `REQUIRED_FIELD` issue for the given field path.
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            code: REQUIRED_FIELD.to_string(),
            message: format!("{field} is required"),
            field,
        }
    }

    /// An issue with an explicit code and message.
    pub fn new(
        code: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of validating an input document. Errors block; warnings don't.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// A passing result.
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Build from collected errors; valid iff there are none.
    pub fn from_errors(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        }
    }
}
