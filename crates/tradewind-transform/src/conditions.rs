//! Per-field conditions for the filter operator and `having` clauses
//!
//! The operator set is the workflow compare set plus the set-membership and
//! presence checks relational filtering needs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tradewind_core::coerce::values_equal;
use tradewind_core::condition::{compare, CompareOp};
use tradewind_core::path::get_path;

/// How multiple conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterMode {
    #[default]
    And,
    Or,
}

/// Operators usable in a per-field condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOp {
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
    #[serde(rename = "in")]
    In,
    #[serde(rename = "notIn")]
    NotIn,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "isNull")]
    IsNull,
    #[serde(rename = "regex")]
    Regex,
}

/// One field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCondition {
    pub field: String,
    pub op: FieldOp,
    #[serde(default)]
    pub value: Value,
}

impl FieldCondition {
    /// Whether a record satisfies this condition.
    pub fn matches(&self, record: &Value) -> bool {
        let actual = get_path(record, &self.field).cloned().unwrap_or(Value::Null);
        match self.op {
            FieldOp::Eq => compare(&actual, CompareOp::Eq, &self.value),
            FieldOp::Ne => compare(&actual, CompareOp::Ne, &self.value),
            FieldOp::Gt => compare(&actual, CompareOp::Gt, &self.value),
            FieldOp::Gte => compare(&actual, CompareOp::Gte, &self.value),
            FieldOp::Lt => compare(&actual, CompareOp::Lt, &self.value),
            FieldOp::Lte => compare(&actual, CompareOp::Lte, &self.value),
            FieldOp::Contains => compare(&actual, CompareOp::Contains, &self.value),
            FieldOp::StartsWith => compare(&actual, CompareOp::StartsWith, &self.value),
            FieldOp::EndsWith => compare(&actual, CompareOp::EndsWith, &self.value),
            FieldOp::Matches | FieldOp::Regex => compare(&actual, CompareOp::Matches, &self.value),
            FieldOp::In => self
                .value
                .as_array()
                .is_some_and(|options| options.iter().any(|o| values_equal(&actual, o))),
            FieldOp::NotIn => self
                .value
                .as_array()
                .is_some_and(|options| !options.iter().any(|o| values_equal(&actual, o))),
            FieldOp::Exists => !actual.is_null(),
            FieldOp::IsNull => actual.is_null(),
        }
    }
}

/// Evaluate a condition list under a combine mode. An empty list passes.
pub fn conditions_match(conditions: &[FieldCondition], mode: FilterMode, record: &Value) -> bool {
    match mode {
        FilterMode::And => conditions.iter().all(|c| c.matches(record)),
        FilterMode::Or => {
            conditions.is_empty() || conditions.iter().any(|c| c.matches(record))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(field: &str, op: FieldOp, value: Value) -> FieldCondition {
        FieldCondition {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_compare_ops() {
        let record = json!({"status": "completed", "amount": 150});
        assert!(condition("status", FieldOp::Eq, json!("completed")).matches(&record));
        assert!(condition("amount", FieldOp::Gte, json!(100)).matches(&record));
        assert!(!condition("amount", FieldOp::Lt, json!(100)).matches(&record));
    }

    #[test]
    fn test_membership_ops() {
        let record = json!({"region": "North"});
        assert!(condition("region", FieldOp::In, json!(["North", "South"])).matches(&record));
        assert!(condition("region", FieldOp::NotIn, json!(["East"])).matches(&record));
    }

    #[test]
    fn test_presence_ops() {
        let record = json!({"email": "a@b.c", "phone": null});
        assert!(condition("email", FieldOp::Exists, json!(null)).matches(&record));
        assert!(condition("phone", FieldOp::IsNull, json!(null)).matches(&record));
        assert!(condition("missing", FieldOp::IsNull, json!(null)).matches(&record));
    }

    #[test]
    fn test_regex_op() {
        let record = json!({"sku": "AB-1234"});
        assert!(condition("sku", FieldOp::Regex, json!(r"^AB-\d+$")).matches(&record));
        assert!(!condition("sku", FieldOp::Regex, json!(r"^CD-")).matches(&record));
    }

    #[test]
    fn test_modes() {
        let record = json!({"a": 1, "b": 2});
        let conditions = vec![
            condition("a", FieldOp::Eq, json!(1)),
            condition("b", FieldOp::Eq, json!(99)),
        ];
        assert!(!conditions_match(&conditions, FilterMode::And, &record));
        assert!(conditions_match(&conditions, FilterMode::Or, &record));
        assert!(conditions_match(&[], FilterMode::And, &record));
        assert!(conditions_match(&[], FilterMode::Or, &record));
    }
}
