//! Shared condition shape
//!
//! The workflow engine and the expression evaluator dispatch over the same
//! condition tree: `compare` leaves resolved through field/constant value
//! sources, `exists` leaves querying a collection, and `and`/`or`/`not`
//! combinators with short-circuit semantics.
//!
//! This module evaluates everything that needs no storage. The `exists`
//! variant is resolved by the workflow engine's condition evaluator, which
//! has repository access; inside a pure expression `conditional` it
//! evaluates to false.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::{as_f64, to_display_string, values_equal};
use crate::path::get_path;

/// Where a comparison operand comes from: the record under evaluation, or a
/// constant embedded in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum ValueSource {
    Field { path: String },
    Constant { value: Value },
}

impl ValueSource {
    /// Resolve against a record. A missing field is absent (`null`).
    pub fn resolve(&self, record: &Value) -> Value {
        match self {
            Self::Field { path } => get_path(record, path).cloned().unwrap_or(Value::Null),
            Self::Constant { value } => value.clone(),
        }
    }

    /// Shorthand for a field reference.
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field { path: path.into() }
    }

    /// Shorthand for a constant.
    pub fn constant(value: Value) -> Self {
        Self::Constant { value }
    }
}

/// Comparison operators shared by conditions and per-field filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = "endsWith")]
    EndsWith,
    #[serde(rename = "matches")]
    Matches,
}

/// Apply a comparison operator to two resolved values.
///
/// Numeric comparators coerce via numeric parse and fail closed on
/// non-numeric operands; `NaN` satisfies nothing. `contains` works on both
/// strings and arrays. `matches` treats the right side as a regex and fails
/// closed on an invalid pattern.
pub fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            match (as_f64(left), as_f64(right)) {
                (Some(l), Some(r)) => match op {
                    CompareOp::Gt => l > r,
                    CompareOp::Gte => l >= r,
                    CompareOp::Lt => l < r,
                    CompareOp::Lte => l <= r,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        CompareOp::Contains => match left {
            Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
            _ => to_display_string(left).contains(&to_display_string(right)),
        },
        CompareOp::StartsWith => to_display_string(left).starts_with(&to_display_string(right)),
        CompareOp::EndsWith => to_display_string(left).ends_with(&to_display_string(right)),
        CompareOp::Matches => regex::Regex::new(&to_display_string(right))
            .map(|re| re.is_match(&to_display_string(left)))
            .unwrap_or(false),
    }
}

/// Single-field filter used by `exists` queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsFilter {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

impl ExistsFilter {
    /// Whether a record satisfies this filter.
    pub fn matches(&self, record: &Value) -> bool {
        let left = get_path(record, &self.field).cloned().unwrap_or(Value::Null);
        compare(&left, self.op, &self.value)
    }
}

/// The condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    Compare {
        left: ValueSource,
        op: CompareOp,
        right: ValueSource,
    },
    Exists {
        collection: String,
        filter: ExistsFilter,
    },
    And { conditions: Vec<Condition> },
    Or { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

/// Pure evaluation against a record.
///
/// `exists` evaluates to false here; the workflow condition evaluator
/// overrides it with a repository query.
pub fn evaluate_condition(condition: &Condition, record: &Value) -> bool {
    match condition {
        Condition::Compare { left, op, right } => {
            compare(&left.resolve(record), *op, &right.resolve(record))
        }
        Condition::Exists { .. } => false,
        Condition::And { conditions } => conditions.iter().all(|c| evaluate_condition(c, record)),
        Condition::Or { conditions } => conditions.iter().any(|c| evaluate_condition(c, record)),
        Condition::Not { condition } => !evaluate_condition(condition, record),
    }
}
