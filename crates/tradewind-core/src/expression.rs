//! Pure tree-walk expression evaluator
//!
//! `evaluate(expr, record)` never performs I/O and never returns an error:
//! the only failure modes are the absent value (`null`) and, for math, a
//! non-finite result which collapses to absent at the JSON boundary (JSON
//! has no NaN). Conditions nested under `conditional` are evaluated with
//! the pure subset of the condition tree.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, SecondsFormat, TimeZone, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::{as_f64, to_display_string, values_equal};
use crate::condition::{evaluate_condition, Condition};
use crate::path::get_path;

/// Binary and unary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "round")]
    Round,
    #[serde(rename = "floor")]
    Floor,
    #[serde(rename = "ceil")]
    Ceil,
    #[serde(rename = "abs")]
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateOp {
    Now,
    Format,
    Parse,
    Add,
    Diff,
    StartOf,
    EndOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArrayOp {
    Length,
    First,
    Last,
    Join,
    Includes,
    At,
    Slice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StringOp {
    Upper,
    Lower,
    Trim,
    Split,
    Substring,
    Replace,
    Length,
    PadStart,
    PadEnd,
}

/// The expression tree. Finite, acyclic, side-effect free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expression {
    Field {
        path: String,
    },
    Literal {
        value: Value,
    },
    Concat {
        values: Vec<Expression>,
        #[serde(default)]
        separator: Option<String>,
    },
    Template {
        template: String,
    },
    Math {
        op: MathOp,
        left: Box<Expression>,
        #[serde(default)]
        right: Option<Box<Expression>>,
    },
    Coalesce {
        values: Vec<Expression>,
    },
    Conditional {
        condition: Box<Condition>,
        then: Box<Expression>,
        #[serde(rename = "else")]
        otherwise: Box<Expression>,
    },
    Date {
        op: DateOp,
        #[serde(default)]
        value: Option<Box<Expression>>,
        #[serde(default)]
        other: Option<Box<Expression>>,
        #[serde(default)]
        amount: Option<f64>,
        #[serde(default)]
        unit: Option<DateUnit>,
        #[serde(default)]
        format: Option<String>,
    },
    Array {
        op: ArrayOp,
        path: String,
        #[serde(default)]
        separator: Option<String>,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        index: Option<i64>,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        end: Option<i64>,
    },
    String {
        op: StringOp,
        path: String,
        #[serde(default)]
        separator: Option<String>,
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        replacement: Option<String>,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        end: Option<i64>,
        #[serde(default)]
        length: Option<usize>,
        #[serde(default)]
        pad: Option<String>,
    },
}

impl Expression {
    /// Shorthand for a field reference.
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field { path: path.into() }
    }

    /// Shorthand for a literal.
    pub fn literal(value: Value) -> Self {
        Self::Literal { value }
    }
}

static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("template pattern is valid"));

/// Evaluate an expression against a record.
pub fn evaluate(expr: &Expression, record: &Value) -> Value {
    match expr {
        Expression::Field { path } => get_path(record, path).cloned().unwrap_or(Value::Null),
        Expression::Literal { value } => value.clone(),
        Expression::Concat { values, separator } => {
            let parts: Vec<String> = values
                .iter()
                .map(|v| to_display_string(&evaluate(v, record)))
                .collect();
            Value::String(parts.join(separator.as_deref().unwrap_or("")))
        }
        Expression::Template { template } => {
            let rendered = TEMPLATE_RE.replace_all(template, |caps: &regex::Captures<'_>| {
                get_path(record, &caps[1])
                    .map(to_display_string)
                    .unwrap_or_default()
            });
            Value::String(rendered.into_owned())
        }
        Expression::Math { op, left, right } => {
            let l = as_f64(&evaluate(left, record)).unwrap_or(f64::NAN);
            let r = right
                .as_ref()
                .map(|r| as_f64(&evaluate(r, record)).unwrap_or(f64::NAN));
            number_value(eval_math(*op, l, r))
        }
        Expression::Coalesce { values } => values
            .iter()
            .map(|v| evaluate(v, record))
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        Expression::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if evaluate_condition(condition, record) {
                evaluate(then, record)
            } else {
                evaluate(otherwise, record)
            }
        }
        Expression::Date {
            op,
            value,
            other,
            amount,
            unit,
            format,
        } => eval_date(record, *op, value.as_deref(), other.as_deref(), *amount, *unit, format.as_deref()),
        Expression::Array {
            op,
            path,
            separator,
            value,
            index,
            start,
            end,
        } => eval_array(record, *op, path, separator.as_deref(), value.as_ref(), *index, *start, *end),
        Expression::String {
            op,
            path,
            separator,
            search,
            replacement,
            start,
            end,
            length,
            pad,
        } => eval_string(
            record,
            *op,
            path,
            separator.as_deref(),
            search.as_deref(),
            replacement.as_deref(),
            *start,
            *end,
            *length,
            pad.as_deref(),
        ),
    }
}

fn eval_math(op: MathOp, left: f64, right: Option<f64>) -> f64 {
    match op {
        MathOp::Add => left + right.unwrap_or(f64::NAN),
        MathOp::Sub => left - right.unwrap_or(f64::NAN),
        MathOp::Mul => left * right.unwrap_or(f64::NAN),
        MathOp::Div => {
            let r = right.unwrap_or(f64::NAN);
            if r == 0.0 {
                f64::NAN
            } else {
                left / r
            }
        }
        MathOp::Mod => {
            let r = right.unwrap_or(f64::NAN);
            if r == 0.0 {
                f64::NAN
            } else {
                left % r
            }
        }
        MathOp::Round => left.round(),
        MathOp::Floor => left.floor(),
        MathOp::Ceil => left.ceil(),
        MathOp::Abs => left.abs(),
    }
}

/// Non-finite math results collapse to absent at the JSON boundary.
fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// =============================================================================
// Date operations
// =============================================================================

/// Convert the `YYYY MM DD HH mm ss` token alphabet to a chrono format.
fn chrono_format(tokens: &str) -> String {
    tokens
        .replace("YYYY", "%Y")
        .replace("MM", "%m")
        .replace("DD", "%d")
        .replace("HH", "%H")
        .replace("mm", "%M")
        .replace("ss", "%S")
}

/// Parse a value into a UTC instant. Accepts RFC 3339, `YYYY-MM-DD`
/// (with optional time), and epoch milliseconds.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.with_timezone(&Utc));
            }
            if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(parsed.and_utc());
            }
            if let Ok(parsed) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
            None
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn parse_date_with_format(value: &Value, format: Option<&str>) -> Option<DateTime<Utc>> {
    if let (Some(fmt), Value::String(s)) = (format, value) {
        let fmt = chrono_format(fmt);
        if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(s.trim(), &fmt) {
            return Some(parsed.and_utc());
        }
        if let Ok(parsed) = NaiveDate::parse_from_str(s.trim(), &fmt) {
            return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
        return None;
    }
    parse_date(value)
}

fn iso(date: DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn date_add(date: DateTime<Utc>, amount: f64, unit: DateUnit) -> Option<DateTime<Utc>> {
    let n = amount as i64;
    match unit {
        DateUnit::Second => date.checked_add_signed(Duration::seconds(n)),
        DateUnit::Minute => date.checked_add_signed(Duration::minutes(n)),
        DateUnit::Hour => date.checked_add_signed(Duration::hours(n)),
        DateUnit::Day => date.checked_add_signed(Duration::days(n)),
        DateUnit::Week => date.checked_add_signed(Duration::weeks(n)),
        DateUnit::Month | DateUnit::Year => {
            let months = if unit == DateUnit::Year { n * 12 } else { n };
            if months >= 0 {
                date.checked_add_months(Months::new(months as u32))
            } else {
                date.checked_sub_months(Months::new((-months) as u32))
            }
        }
    }
}

/// Whole months between two instants, truncated toward zero.
fn diff_months(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    let mut months =
        (a.year() as i64 - b.year() as i64) * 12 + (a.month() as i64 - b.month() as i64);
    if months > 0
        && b.checked_add_months(Months::new(months as u32))
            .map(|adjusted| adjusted > a)
            .unwrap_or(false)
    {
        months -= 1;
    }
    if months < 0
        && b.checked_sub_months(Months::new((-months) as u32))
            .map(|adjusted| adjusted < a)
            .unwrap_or(false)
    {
        months += 1;
    }
    months
}

fn date_diff(a: DateTime<Utc>, b: DateTime<Utc>, unit: DateUnit) -> i64 {
    let delta = a - b;
    match unit {
        DateUnit::Second => delta.num_seconds(),
        DateUnit::Minute => delta.num_minutes(),
        DateUnit::Hour => delta.num_hours(),
        DateUnit::Day => delta.num_days(),
        DateUnit::Week => delta.num_weeks(),
        DateUnit::Month => diff_months(a, b),
        DateUnit::Year => diff_months(a, b) / 12,
    }
}

fn start_of(date: DateTime<Utc>, unit: DateUnit) -> Option<DateTime<Utc>> {
    match unit {
        DateUnit::Second => date.with_nanosecond(0),
        DateUnit::Minute => date.with_nanosecond(0)?.with_second(0),
        DateUnit::Hour => date.with_nanosecond(0)?.with_second(0)?.with_minute(0),
        DateUnit::Day => date.date_naive().and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
        DateUnit::Week => {
            // Sunday-based weeks
            let back = date.weekday().num_days_from_sunday() as i64;
            (date - Duration::days(back))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
        }
        DateUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc()),
        DateUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc()),
    }
}

fn end_of(date: DateTime<Utc>, unit: DateUnit) -> Option<DateTime<Utc>> {
    let start = start_of(date, unit)?;
    let next = match unit {
        DateUnit::Second => start.checked_add_signed(Duration::seconds(1)),
        DateUnit::Minute => start.checked_add_signed(Duration::minutes(1)),
        DateUnit::Hour => start.checked_add_signed(Duration::hours(1)),
        DateUnit::Day => start.checked_add_signed(Duration::days(1)),
        DateUnit::Week => start.checked_add_signed(Duration::weeks(1)),
        DateUnit::Month => start.checked_add_months(Months::new(1)),
        DateUnit::Year => start.checked_add_months(Months::new(12)),
    }?;
    next.checked_sub_signed(Duration::milliseconds(1))
}

#[allow(clippy::too_many_arguments)]
fn eval_date(
    record: &Value,
    op: DateOp,
    value: Option<&Expression>,
    other: Option<&Expression>,
    amount: Option<f64>,
    unit: Option<DateUnit>,
    format: Option<&str>,
) -> Value {
    let resolve = |expr: Option<&Expression>| expr.map(|e| evaluate(e, record));
    match op {
        DateOp::Now => iso(Utc::now()),
        DateOp::Format => {
            let Some(date) = resolve(value).as_ref().and_then(parse_date) else {
                return Value::Null;
            };
            match format {
                Some(tokens) => {
                    Value::String(date.format(&chrono_format(tokens)).to_string())
                }
                None => iso(date),
            }
        }
        DateOp::Parse => {
            let Some(raw) = resolve(value) else {
                return Value::Null;
            };
            parse_date_with_format(&raw, format).map(iso).unwrap_or(Value::Null)
        }
        DateOp::Add => {
            let Some(date) = resolve(value).as_ref().and_then(parse_date) else {
                return Value::Null;
            };
            match (amount, unit) {
                (Some(amount), Some(unit)) => {
                    date_add(date, amount, unit).map(iso).unwrap_or(Value::Null)
                }
                _ => Value::Null,
            }
        }
        DateOp::Diff => {
            let left = resolve(value).as_ref().and_then(parse_date);
            let right = resolve(other).as_ref().and_then(parse_date);
            match (left, right, unit) {
                (Some(l), Some(r), Some(unit)) => Value::from(date_diff(l, r, unit)),
                _ => Value::Null,
            }
        }
        DateOp::StartOf => {
            let date = resolve(value).as_ref().and_then(parse_date);
            match (date, unit) {
                (Some(d), Some(unit)) => start_of(d, unit).map(iso).unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
        DateOp::EndOf => {
            let date = resolve(value).as_ref().and_then(parse_date);
            match (date, unit) {
                (Some(d), Some(unit)) => end_of(d, unit).map(iso).unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
    }
}

// =============================================================================
// Array and string operations
// =============================================================================

/// Normalize an optionally-negative range onto `0..len`.
fn clamp_range(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let n = len as i64;
    let norm = |i: i64| if i < 0 { (n + i).max(0) } else { i.min(n) };
    let s = norm(start.unwrap_or(0));
    let e = norm(end.unwrap_or(n)).max(s);
    (s as usize, e as usize)
}

#[allow(clippy::too_many_arguments)]
fn eval_array(
    record: &Value,
    op: ArrayOp,
    path: &str,
    separator: Option<&str>,
    value: Option<&Value>,
    index: Option<i64>,
    start: Option<i64>,
    end: Option<i64>,
) -> Value {
    let resolved = get_path(record, path);
    let Some(Value::Array(items)) = resolved else {
        // Wrong kind: length degrades to zero, everything else to absent
        return match op {
            ArrayOp::Length => Value::from(0),
            _ => Value::Null,
        };
    };
    match op {
        ArrayOp::Length => Value::from(items.len()),
        ArrayOp::First => items.first().cloned().unwrap_or(Value::Null),
        ArrayOp::Last => items.last().cloned().unwrap_or(Value::Null),
        ArrayOp::Join => {
            let parts: Vec<String> = items.iter().map(to_display_string).collect();
            Value::String(parts.join(separator.unwrap_or(",")))
        }
        ArrayOp::Includes => {
            let needle = value.cloned().unwrap_or(Value::Null);
            Value::Bool(items.iter().any(|item| values_equal(item, &needle)))
        }
        ArrayOp::At => {
            let i = index.unwrap_or(0);
            let i = if i < 0 { items.len() as i64 + i } else { i };
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null)
        }
        ArrayOp::Slice => {
            let (s, e) = clamp_range(items.len(), start, end);
            Value::Array(items[s..e].to_vec())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn eval_string(
    record: &Value,
    op: StringOp,
    path: &str,
    separator: Option<&str>,
    search: Option<&str>,
    replacement: Option<&str>,
    start: Option<i64>,
    end: Option<i64>,
    length: Option<usize>,
    pad: Option<&str>,
) -> Value {
    let resolved = get_path(record, path);
    let Some(Value::String(s)) = resolved else {
        return match op {
            StringOp::Length => Value::from(0),
            _ => Value::Null,
        };
    };
    match op {
        StringOp::Upper => Value::String(s.to_uppercase()),
        StringOp::Lower => Value::String(s.to_lowercase()),
        StringOp::Trim => Value::String(s.trim().to_string()),
        StringOp::Split => {
            let sep = separator.unwrap_or(",");
            Value::Array(s.split(sep).map(|part| Value::String(part.to_string())).collect())
        }
        StringOp::Substring => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = clamp_range(chars.len(), start, end);
            Value::String(chars[from..to].iter().collect())
        }
        StringOp::Replace => {
            let Some(search) = search else {
                return Value::String(s.clone());
            };
            Value::String(s.replace(search, replacement.unwrap_or("")))
        }
        StringOp::Length => Value::from(s.chars().count()),
        StringOp::PadStart | StringOp::PadEnd => {
            let target = length.unwrap_or(0);
            let pad = pad.unwrap_or(" ");
            let mut out = s.clone();
            if pad.is_empty() {
                return Value::String(out);
            }
            let mut padding = String::new();
            while out.chars().count() + padding.chars().count() < target {
                padding.push_str(pad);
            }
            let missing = target.saturating_sub(out.chars().count());
            let padding: String = padding.chars().take(missing).collect();
            if op == StringOp::PadStart {
                out = format!("{padding}{out}");
            } else {
                out.push_str(&padding);
            }
            Value::String(out)
        }
    }
}
