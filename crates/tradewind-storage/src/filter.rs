//! Structural record filters
//!
//! A filter is a JSON object: keys are field paths mapped to either a bare
//! value (loose equality) or an object of operators, with the reserved
//! `and`/`or` keys taking arrays of nested filters.
//!
//! ```json
//! {"status": "completed", "total": {"gte": 100, "lt": 500}}
//! {"or": [{"region": "North"}, {"region": {"eq": "South"}}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tradewind_core::coerce::values_equal;
use tradewind_core::condition::{compare, CompareOp};
use tradewind_core::expression::parse_date;
use tradewind_core::path::get_path;

const OPS: &[&str] = &[
    "eq", "ne", "in", "nin", "gt", "gte", "lt", "lte", "contains", "startsWith", "endsWith",
    "before", "after", "between",
];

/// A structural filter over records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(pub Map<String, Value>);

impl Filter {
    /// Build from a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Loose-equality filter on a single field.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(field.into(), value);
        Self(map)
    }

    /// Whether a record satisfies every clause of this filter.
    pub fn matches(&self, record: &Value) -> bool {
        self.0.iter().all(|(key, spec)| match key.as_str() {
            "and" => spec
                .as_array()
                .is_some_and(|clauses| clauses.iter().all(|c| nested_matches(c, record))),
            "or" => spec
                .as_array()
                .is_some_and(|clauses| clauses.iter().any(|c| nested_matches(c, record))),
            field => field_matches(record, field, spec),
        })
    }
}

fn nested_matches(clause: &Value, record: &Value) -> bool {
    match clause {
        Value::Object(map) => Filter(map.clone()).matches(record),
        _ => false,
    }
}

fn field_matches(record: &Value, field: &str, spec: &Value) -> bool {
    let actual = get_path(record, field).cloned().unwrap_or(Value::Null);
    match spec {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| OPS.contains(&k.as_str())) => {
            ops.iter().all(|(op, operand)| apply_op(&actual, op, operand))
        }
        other => values_equal(&actual, other),
    }
}

fn apply_op(actual: &Value, op: &str, operand: &Value) -> bool {
    match op {
        "eq" => values_equal(actual, operand),
        "ne" => !values_equal(actual, operand),
        "in" => operand
            .as_array()
            .is_some_and(|options| options.iter().any(|o| values_equal(actual, o))),
        "nin" => operand
            .as_array()
            .is_some_and(|options| !options.iter().any(|o| values_equal(actual, o))),
        "gt" => compare(actual, CompareOp::Gt, operand),
        "gte" => compare(actual, CompareOp::Gte, operand),
        "lt" => compare(actual, CompareOp::Lt, operand),
        "lte" => compare(actual, CompareOp::Lte, operand),
        "contains" => compare(actual, CompareOp::Contains, operand),
        "startsWith" => compare(actual, CompareOp::StartsWith, operand),
        "endsWith" => compare(actual, CompareOp::EndsWith, operand),
        "before" => match (parse_date(actual), parse_date(operand)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        "after" => match (parse_date(actual), parse_date(operand)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        "between" => match operand.as_array().map(Vec::as_slice) {
            Some([lo, hi]) => {
                compare(actual, CompareOp::Gte, lo) && compare(actual, CompareOp::Lte, hi)
                    || matches!(
                        (parse_date(actual), parse_date(lo), parse_date(hi)),
                        (Some(a), Some(l), Some(h)) if l <= a && a <= h
                    )
            }
            _ => false,
        },
        _ => false,
    }
}
