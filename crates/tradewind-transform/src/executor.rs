//! Transform step executor
//!
//! Each operator reads every row of its source collection(s), computes the
//! output rows in memory, and rewrites the output collection (cleared and
//! recreated). Failures carry the step id and a human-readable message;
//! whether the run continues is the orchestrator's call.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use tradewind_core::coerce::to_display_string;
use tradewind_core::expression::{evaluate, Expression};
use tradewind_core::path::{get_path, set_path};
use tradewind_storage::aggregate::{compute, Aggregation};
use tradewind_storage::{aggregate_rows, AggregateFunction, AggregateOptions, Storage};

use crate::conditions::{conditions_match, FieldCondition, FilterMode};
use crate::error::TransformError;
use crate::types::{StepType, TransformStep};

/// What one operator invocation did.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub input_rows: usize,
    pub output_rows: usize,
    pub output_collection: String,
}

/// Executes a single transform step against the store.
pub struct StepExecutor {
    storage: Arc<dyn Storage>,
}

impl StepExecutor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Run one step. The output collection is cleared and recreated.
    pub async fn execute(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        debug!(step_id = %step.id, step_type = ?step.step_type, "executing transform step");
        match step.step_type {
            StepType::Filter => self.run_filter(step).await,
            StepType::Map => self.run_map(step).await,
            StepType::Aggregate => self.run_aggregate(step).await,
            StepType::Join => self.run_join(step).await,
            StepType::Lookup => self.run_lookup(step).await,
            StepType::Union => self.run_union(step).await,
            StepType::Deduplicate => self.run_deduplicate(step).await,
            StepType::Sort => self.run_sort(step).await,
            StepType::Limit => self.run_limit(step).await,
            StepType::Pivot => self.run_pivot(step).await,
            StepType::Unpivot => self.run_unpivot(step).await,
            StepType::Flatten => self.run_flatten(step).await,
        }
    }

    fn decode<T: DeserializeOwned>(&self, step: &TransformStep) -> Result<T, TransformError> {
        serde_json::from_value(step.config.clone())
            .map_err(|e| TransformError::step(&step.id, format!("invalid config: {e}")))
    }

    async fn read(&self, step_id: &str, collection: &str) -> Result<Vec<Value>, TransformError> {
        let repository = self
            .storage
            .repository(collection)
            .await
            .map_err(|e| TransformError::step(step_id, e.to_string()))?;
        repository
            .find_all(None)
            .await
            .map_err(|e| TransformError::step(step_id, e.to_string()))
    }

    /// Clear and rewrite the output collection. Rows whose id is missing or
    /// already taken in this batch get a fresh one.
    async fn write(
        &self,
        step_id: &str,
        collection: &str,
        rows: Vec<Value>,
    ) -> Result<usize, TransformError> {
        let repository = self.storage.ensure_collection(collection).await;
        repository
            .clear()
            .await
            .map_err(|e| TransformError::step(step_id, e.to_string()))?;
        let mut written = 0;
        let mut taken: HashSet<String> = HashSet::new();
        for mut row in rows {
            if !row.is_object() {
                return Err(TransformError::step(
                    step_id,
                    "output rows must be objects".to_string(),
                ));
            }
            let duplicate = row
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| !taken.insert(id.to_string()));
            if duplicate {
                if let Some(map) = row.as_object_mut() {
                    map.remove("id");
                }
            }
            let created = repository
                .create(row)
                .await
                .map_err(|e| TransformError::step(step_id, e.to_string()))?;
            if let Some(id) = created.get("id").and_then(Value::as_str) {
                taken.insert(id.to_string());
            }
            written += 1;
        }
        Ok(written)
    }

    async fn finish(
        &self,
        step: &TransformStep,
        input_rows: usize,
        output: String,
        rows: Vec<Value>,
    ) -> Result<StepOutcome, TransformError> {
        let output_rows = self.write(&step.id, &output, rows).await?;
        Ok(StepOutcome {
            input_rows,
            output_rows,
            output_collection: output,
        })
    }

    // =========================================================================
    // Operators
    // =========================================================================

    async fn run_filter(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: FilterConfig = self.decode(step)?;
        let rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        let kept: Vec<Value> = rows
            .into_iter()
            .filter(|row| conditions_match(&config.conditions, config.mode, row))
            .collect();
        self.finish(step, input, config.output, kept).await
    }

    async fn run_map(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: MapConfig = self.decode(step)?;
        let rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        let mapped: Vec<Value> = rows
            .iter()
            .map(|row| {
                let mut out = if config.include_original {
                    row.clone()
                } else {
                    let mut seed = Map::new();
                    if let Some(id) = row.get("id") {
                        seed.insert("id".to_string(), id.clone());
                    }
                    Value::Object(seed)
                };
                for mapping in &config.mappings {
                    set_path(&mut out, &mapping.target, evaluate(&mapping.expression, row));
                }
                out
            })
            .collect();
        self.finish(step, input, config.output, mapped).await
    }

    async fn run_aggregate(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: AggregateConfig = self.decode(step)?;
        let rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        let options = AggregateOptions {
            group_by: config.group_by,
            aggregations: config.aggregations,
            filter: None,
        };
        let groups: Vec<Value> = aggregate_rows(&rows, &options)
            .into_iter()
            .filter(|group| conditions_match(&config.having, FilterMode::And, group))
            .collect();
        self.finish(step, input, config.output, groups).await
    }

    async fn run_join(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: JoinConfig = self.decode(step)?;
        if config.on.is_empty() {
            return Err(TransformError::step(&step.id, "join requires at least one key pair"));
        }
        let left_rows = self.read(&step.id, &config.left).await?;
        let right_rows = self.read(&step.id, &config.right).await?;
        let input = left_rows.len() + right_rows.len();

        let left_fields: Vec<&str> = config.on.iter().map(|k| k.left_field.as_str()).collect();
        let right_fields: Vec<&str> = config.on.iter().map(|k| k.right_field.as_str()).collect();

        // The right side is indexed once on the joined-key tuple
        let mut right_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, row) in right_rows.iter().enumerate() {
            right_index
                .entry(join_key(row, &right_fields))
                .or_default()
                .push(position);
        }

        let mut out = Vec::new();
        let mut matched_rights: HashSet<usize> = HashSet::new();
        for left_row in &left_rows {
            let key = join_key(left_row, &left_fields);
            match right_index.get(&key) {
                Some(positions) => {
                    for &position in positions {
                        matched_rights.insert(position);
                        out.push(merge_joined(
                            Some(left_row),
                            Some(&right_rows[position]),
                            &config,
                        ));
                    }
                }
                None => {
                    if matches!(config.join_type, JoinType::Left | JoinType::Full) {
                        out.push(merge_joined(Some(left_row), None, &config));
                    }
                }
            }
        }
        if matches!(config.join_type, JoinType::Right | JoinType::Full) {
            for (position, right_row) in right_rows.iter().enumerate() {
                if !matched_rights.contains(&position) {
                    out.push(merge_joined(None, Some(right_row), &config));
                }
            }
        }
        // Inner and right joins drop unmatched lefts; that is the whole point
        let output = config.output.clone();
        self.finish(step, input, output, out).await
    }

    async fn run_lookup(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: LookupConfig = self.decode(step)?;
        let rows = self.read(&step.id, &config.source).await?;
        let from_rows = self.read(&step.id, &config.from).await?;
        let input = rows.len() + from_rows.len();

        let mut index: HashMap<String, Vec<&Value>> = HashMap::new();
        for row in &from_rows {
            let key = join_key(row, &[config.foreign_field.as_str()]);
            index.entry(key).or_default().push(row);
        }

        let out: Vec<Value> = rows
            .iter()
            .map(|row| {
                let key = join_key(row, &[config.local_field.as_str()]);
                let matches = index.get(&key).map(Vec::as_slice).unwrap_or(&[]);
                let attached = if config.multiple {
                    Value::Array(matches.iter().map(|m| (*m).clone()).collect())
                } else {
                    matches.first().map(|m| (*m).clone()).unwrap_or(Value::Null)
                };
                let mut out = row.clone();
                set_path(&mut out, &config.target, attached);
                out
            })
            .collect();
        self.finish(step, input, config.output, out).await
    }

    async fn run_union(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: UnionConfig = self.decode(step)?;
        let mut all = Vec::new();
        for source in &config.sources {
            all.extend(self.read(&step.id, source).await?);
        }
        let input = all.len();
        let out = match config.mode {
            UnionMode::All => all,
            UnionMode::Distinct => {
                let mut seen: HashSet<String> = HashSet::new();
                all.into_iter()
                    .filter(|row| seen.insert(distinct_key(row, &config.distinct_keys)))
                    .collect()
            }
        };
        self.finish(step, input, config.output, out).await
    }

    async fn run_deduplicate(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: DeduplicateConfig = self.decode(step)?;
        let mut rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        if !config.order_by.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &config.order_by));
        }
        let mut kept: IndexMap<String, Value> = IndexMap::new();
        for row in rows {
            let key = distinct_key(&row, &config.keys);
            match config.keep {
                KeepRule::First => {
                    kept.entry(key).or_insert(row);
                }
                KeepRule::Last => {
                    // insert keeps the first-seen position, the value is replaced
                    kept.insert(key, row);
                }
            }
        }
        let out: Vec<Value> = kept.into_values().collect();
        self.finish(step, input, config.output, out).await
    }

    async fn run_sort(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: SortConfig = self.decode(step)?;
        let mut rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        rows.sort_by(|a, b| compare_rows(a, b, &config.order_by));
        self.finish(step, input, config.output, rows).await
    }

    async fn run_limit(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: LimitConfig = self.decode(step)?;
        let rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        let out: Vec<Value> = rows.into_iter().skip(config.offset).take(config.limit).collect();
        self.finish(step, input, config.output, out).await
    }

    async fn run_pivot(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: PivotConfig = self.decode(step)?;
        let rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();

        let mut groups: IndexMap<String, (Vec<Value>, Vec<&Value>)> = IndexMap::new();
        for row in &rows {
            let key_values: Vec<Value> = config
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

        let mut out = Vec::new();
        for (_, (key_values, members)) in groups {
            let mut row = Map::new();
            for (field, value) in config.group_by.iter().zip(key_values) {
                row.insert(field.clone(), value);
            }
            // Bucket members by the stringified pivot value; absent becomes "null"
            let mut buckets: IndexMap<String, Vec<&Value>> = IndexMap::new();
            for member in members {
                let bucket = match get_path(member, &config.pivot_field) {
                    Some(Value::Null) | None => "null".to_string(),
                    Some(value) => to_display_string(value),
                };
                buckets.entry(bucket).or_default().push(member);
            }
            for (bucket, bucket_members) in buckets {
                let aggregation = Aggregation {
                    function: config.aggregation,
                    field: config.value_field.clone(),
                    output: bucket.clone(),
                };
                row.insert(bucket, compute(&aggregation, &bucket_members));
            }
            out.push(Value::Object(row));
        }
        self.finish(step, input, config.output, out).await
    }

    async fn run_unpivot(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: UnpivotConfig = self.decode(step)?;
        let rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        let mut out = Vec::new();
        for row in &rows {
            for field in &config.unpivot_fields {
                let mut entry = Value::Object(Map::new());
                for id_field in &config.id_fields {
                    let value = get_path(row, id_field).cloned().unwrap_or(Value::Null);
                    set_path(&mut entry, id_field, value);
                }
                set_path(&mut entry, &config.name_field, Value::String(field.clone()));
                let value = get_path(row, field).cloned().unwrap_or(Value::Null);
                set_path(&mut entry, &config.value_field, value);
                out.push(entry);
            }
        }
        self.finish(step, input, config.output, out).await
    }

    async fn run_flatten(&self, step: &TransformStep) -> Result<StepOutcome, TransformError> {
        let config: FlattenConfig = self.decode(step)?;
        let target = config.target.clone().unwrap_or_else(|| config.field.clone());
        let rows = self.read(&step.id, &config.source).await?;
        let input = rows.len();
        let mut out = Vec::new();
        for row in &rows {
            let items = get_path(row, &config.field).and_then(Value::as_array).cloned();
            match items {
                Some(items) if !items.is_empty() => {
                    for item in items {
                        let mut entry = row.clone();
                        remove_field(&mut entry, &config.field);
                        set_path(&mut entry, &target, item);
                        out.push(entry);
                    }
                }
                _ if config.preserve_empty => {
                    let mut entry = row.clone();
                    remove_field(&mut entry, &config.field);
                    set_path(&mut entry, &target, Value::Null);
                    out.push(entry);
                }
                _ => {}
            }
        }
        self.finish(step, input, config.output, out).await
    }
}

// =============================================================================
// Operator configs
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterConfig {
    source: String,
    output: String,
    #[serde(default)]
    conditions: Vec<FieldCondition>,
    #[serde(default)]
    mode: FilterMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Mapping {
    target: String,
    expression: Expression,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapConfig {
    source: String,
    output: String,
    #[serde(default)]
    mappings: Vec<Mapping>,
    #[serde(default)]
    include_original: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregateConfig {
    source: String,
    output: String,
    #[serde(default)]
    group_by: Vec<String>,
    #[serde(default)]
    aggregations: Vec<Aggregation>,
    #[serde(default)]
    having: Vec<FieldCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinKey {
    left_field: String,
    right_field: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinConfig {
    left: String,
    right: String,
    output: String,
    #[serde(default)]
    join_type: JoinType,
    #[serde(default)]
    on: Vec<JoinKey>,
    #[serde(default)]
    left_prefix: Option<String>,
    #[serde(default)]
    right_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupConfig {
    source: String,
    from: String,
    output: String,
    local_field: String,
    foreign_field: String,
    #[serde(rename = "as")]
    target: String,
    #[serde(default)]
    multiple: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
enum UnionMode {
    #[default]
    All,
    Distinct,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnionConfig {
    sources: Vec<String>,
    output: String,
    #[serde(default)]
    mode: UnionMode,
    #[serde(default)]
    distinct_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
enum KeepRule {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
enum NullsOrder {
    First,
    #[default]
    Last,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SortKey {
    field: String,
    #[serde(default)]
    direction: SortDirection,
    #[serde(default)]
    nulls: NullsOrder,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeduplicateConfig {
    source: String,
    output: String,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    keep: KeepRule,
    #[serde(default)]
    order_by: Vec<SortKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SortConfig {
    source: String,
    output: String,
    #[serde(default)]
    order_by: Vec<SortKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LimitConfig {
    source: String,
    output: String,
    limit: usize,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PivotConfig {
    source: String,
    output: String,
    #[serde(default)]
    group_by: Vec<String>,
    pivot_field: String,
    #[serde(default)]
    value_field: Option<String>,
    aggregation: AggregateFunction,
}

fn default_name_field() -> String {
    "name".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnpivotConfig {
    source: String,
    output: String,
    #[serde(default)]
    id_fields: Vec<String>,
    #[serde(default)]
    unpivot_fields: Vec<String>,
    #[serde(default = "default_name_field")]
    name_field: String,
    #[serde(default = "default_value_field")]
    value_field: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlattenConfig {
    source: String,
    output: String,
    field: String,
    #[serde(rename = "as", default)]
    target: Option<String>,
    #[serde(default)]
    preserve_empty: bool,
}

// =============================================================================
// Helpers
// =============================================================================

/// Canonical key for a tuple of joined fields. Display form is used so
/// `1`, `1.0`, and `"1"` land in the same bucket.
fn join_key(row: &Value, fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| get_path(row, field).map(to_display_string).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Key for distinct/deduplicate. Empty key list keys on the whole record
/// minus its id.
fn distinct_key(row: &Value, keys: &[String]) -> String {
    if keys.is_empty() {
        let mut copy = row.clone();
        if let Some(map) = copy.as_object_mut() {
            map.remove("id");
        }
        return serde_json::to_string(&copy).unwrap_or_default();
    }
    let values: Vec<Value> = keys
        .iter()
        .map(|key| get_path(row, key).cloned().unwrap_or(Value::Null))
        .collect();
    serde_json::to_string(&values).unwrap_or_default()
}

fn merge_joined(left: Option<&Value>, right: Option<&Value>, config: &JoinConfig) -> Value {
    let mut out = Map::new();
    if let Some(row) = left {
        merge_side(&mut out, row, config.left_prefix.as_deref(), "left_");
    }
    if let Some(row) = right {
        merge_side(&mut out, row, config.right_prefix.as_deref(), "right_");
    }
    Value::Object(out)
}

fn merge_side(out: &mut Map<String, Value>, row: &Value, prefix: Option<&str>, id_prefix: &str) {
    let Some(fields) = row.as_object() else { return };
    for (key, value) in fields {
        if key == "id" {
            out.insert(format!("{}id", prefix.unwrap_or(id_prefix)), value.clone());
        } else if let Some(prefix) = prefix {
            out.insert(format!("{prefix}{key}"), value.clone());
        } else {
            out.insert(key.clone(), value.clone());
        }
    }
}

/// Stable multi-key comparator. Numeric when both sides are numbers,
/// otherwise lexicographic on the stringified form; null placement follows
/// the per-key `nulls` rule regardless of direction.
fn compare_rows(a: &Value, b: &Value, order_by: &[SortKey]) -> Ordering {
    for key in order_by {
        let av = get_path(a, &key.field).cloned().unwrap_or(Value::Null);
        let bv = get_path(b, &key.field).cloned().unwrap_or(Value::Null);
        let ordering = match (av.is_null(), bv.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match key.nulls {
                NullsOrder::First => Ordering::Less,
                NullsOrder::Last => Ordering::Greater,
            },
            (false, true) => match key.nulls {
                NullsOrder::First => Ordering::Greater,
                NullsOrder::Last => Ordering::Less,
            },
            (false, false) => {
                let base = match (av.as_f64(), bv.as_f64()) {
                    (Some(x), Some(y)) if av.is_number() && bv.is_number() => {
                        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                    }
                    _ => to_display_string(&av).cmp(&to_display_string(&bv)),
                };
                match key.direction {
                    SortDirection::Asc => base,
                    SortDirection::Desc => base.reverse(),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Drop a top-level field; nested paths are blanked instead.
fn remove_field(row: &mut Value, field: &str) {
    if !field.contains('.') && !field.contains('[') {
        if let Some(map) = row.as_object_mut() {
            map.remove(field);
        }
    } else {
        set_path(row, field, Value::Null);
    }
}
