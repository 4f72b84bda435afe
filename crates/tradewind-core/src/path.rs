//! Dotted/bracketed path resolution over JSON records
//!
//! Paths address nested values with dot segments and bracketed indexes:
//! `a.b.c`, `items[0].name`. Resolution is total — a missing or mistyped
//! segment yields `None`, never an error.

use serde_json::Value;

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Object key (also resolves against arrays when it parses as an index)
    Key(String),
    /// Bracketed array index
    Index(usize),
}

fn parse_path(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                for d in chars.by_ref() {
                    if d == ']' {
                        break;
                    }
                    digits.push(d);
                }
                match digits.parse::<usize>() {
                    Ok(i) => segments.push(Segment::Index(i)),
                    // Non-numeric bracket content behaves like a key lookup
                    Err(_) => segments.push(Segment::Key(digits)),
                }
            }
            _ => key.push(c),
        }
    }
    if !key.is_empty() {
        segments.push(Segment::Key(key));
    }
    segments
}

/// Resolve `path` against `record`.
///
/// Any segment that encounters a non-container (or a missing key/index)
/// short-circuits to `None`. An empty path resolves to the record itself.
pub fn get_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(record);
    }
    let mut current = record;
    for segment in parse_path(path) {
        current = match (&segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Key(k), Value::Array(items)) => {
                items.get(k.parse::<usize>().ok()?)?
            }
            (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate containers as needed.
///
/// Dotted segments create objects; bracketed numeric segments create arrays
/// (padded with nulls up to the index). An intermediate of the wrong shape
/// is replaced.
pub fn set_path(record: &mut Value, path: &str, value: Value) {
    if path.is_empty() {
        *record = value;
        return;
    }
    let segments = parse_path(path);
    let mut current = record;

    for (pos, segment) in segments.iter().enumerate() {
        let last = pos == segments.len() - 1;
        match segment {
            Segment::Key(k) => {
                if !current.is_object() {
                    *current = Value::Object(serde_json::Map::new());
                }
                let Value::Object(map) = current else { return };
                if last {
                    map.insert(k.clone(), value);
                    return;
                }
                current = map.entry(k.clone()).or_insert(Value::Null);
            }
            Segment::Index(i) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let Value::Array(items) = current else { return };
                while items.len() <= *i {
                    items.push(Value::Null);
                }
                if last {
                    items[*i] = value;
                    return;
                }
                current = &mut items[*i];
            }
        }
    }
}
