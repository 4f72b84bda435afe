//! Grouped aggregation over record sets
//!
//! Shared by the repository `aggregate` operation and the transform
//! engine's aggregate/pivot operators. Groups keep first-seen order. An
//! empty `groupBy` always produces exactly one output row, even over an
//! empty input: `count = 0`, `sum = 0`, `avg = 0`, the rest `null`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tradewind_core::coerce::as_f64;
use tradewind_core::path::get_path;

use crate::filter::Filter;

/// Aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Collect,
}

/// One aggregation to compute per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub function: AggregateFunction,
    /// Source field; `count` may omit it to count rows.
    #[serde(default)]
    pub field: Option<String>,
    /// Output column name.
    #[serde(rename = "as")]
    pub output: String,
}

/// Options for a repository aggregate call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOptions {
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    /// Optional pre-filter applied before grouping.
    #[serde(default)]
    pub filter: Option<Filter>,
}

/// Group rows and compute every aggregation per group.
pub fn aggregate_rows(rows: &[Value], options: &AggregateOptions) -> Vec<Value> {
    let filtered: Vec<&Value> = match &options.filter {
        Some(filter) => rows.iter().filter(|r| filter.matches(r)).collect(),
        None => rows.iter().collect(),
    };

    let mut groups: IndexMap<String, (Vec<Value>, Vec<&Value>)> = IndexMap::new();
    if options.group_by.is_empty() {
        groups.insert(String::new(), (Vec::new(), filtered));
    } else {
        for row in filtered {
            let key_values: Vec<Value> = options
                .group_by
                .iter()
                .map(|field| get_path(row, field).cloned().unwrap_or(Value::Null))
                .collect();
            let key = serde_json::to_string(&key_values).unwrap_or_default();
            groups
                .entry(key)
                .or_insert_with(|| (key_values, Vec::new()))
                .1
                .push(row);
        }
    }

    groups
        .into_iter()
        .map(|(_, (key_values, members))| {
            let mut out = Map::new();
            for (field, value) in options.group_by.iter().zip(key_values) {
                out.insert(field.clone(), value);
            }
            for aggregation in &options.aggregations {
                out.insert(
                    aggregation.output.clone(),
                    compute(aggregation, &members),
                );
            }
            Value::Object(out)
        })
        .collect()
}

fn field_values<'a>(members: &[&'a Value], field: &str) -> Vec<&'a Value> {
    members
        .iter()
        .filter_map(|row| get_path(row, field))
        .filter(|v| !v.is_null())
        .collect()
}

/// Compute one aggregation over a group's members.
pub fn compute(aggregation: &Aggregation, members: &[&Value]) -> Value {
    let field = aggregation.field.as_deref();
    match aggregation.function {
        AggregateFunction::Count => match field {
            None => Value::from(members.len()),
            Some(f) => Value::from(field_values(members, f).len()),
        },
        AggregateFunction::CountDistinct => {
            let Some(f) = field else { return Value::from(0) };
            let mut seen: Vec<String> = field_values(members, f)
                .iter()
                .map(|v| serde_json::to_string(v).unwrap_or_default())
                .collect();
            seen.sort();
            seen.dedup();
            Value::from(seen.len())
        }
        AggregateFunction::Sum => {
            let Some(f) = field else { return Value::from(0.0) };
            let total: f64 = field_values(members, f).iter().filter_map(|v| as_f64(v)).sum();
            Value::from(total)
        }
        AggregateFunction::Avg => {
            let Some(f) = field else { return Value::from(0.0) };
            let numbers: Vec<f64> = field_values(members, f)
                .iter()
                .filter_map(|v| as_f64(v))
                .collect();
            if numbers.is_empty() {
                Value::from(0.0)
            } else {
                Value::from(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateFunction::Min | AggregateFunction::Max => {
            let Some(f) = field else { return Value::Null };
            let values = field_values(members, f);
            let numbers: Vec<f64> = values.iter().filter_map(|v| as_f64(v)).collect();
            if !numbers.is_empty() {
                let picked = numbers
                    .into_iter()
                    .reduce(|a, b| match aggregation.function {
                        AggregateFunction::Min => a.min(b),
                        _ => a.max(b),
                    });
                return picked.map(Value::from).unwrap_or(Value::Null);
            }
            // No numerics: fall back to lexicographic order over string forms
            let strings: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
            let picked = match aggregation.function {
                AggregateFunction::Min => strings.into_iter().min(),
                _ => strings.into_iter().max(),
            };
            picked.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null)
        }
        AggregateFunction::First => match field {
            Some(f) => field_values(members, f).first().cloned().cloned().unwrap_or(Value::Null),
            None => members.first().cloned().cloned().unwrap_or(Value::Null),
        },
        AggregateFunction::Last => match field {
            Some(f) => field_values(members, f).last().cloned().cloned().unwrap_or(Value::Null),
            None => members.last().cloned().cloned().unwrap_or(Value::Null),
        },
        AggregateFunction::Collect => {
            let Some(f) = field else { return Value::Array(Vec::new()) };
            Value::Array(field_values(members, f).into_iter().cloned().collect())
        }
    }
}
