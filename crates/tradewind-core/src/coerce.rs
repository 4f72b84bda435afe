//! Loose coercion rules shared by every comparison site
//!
//! All engines coerce the same way: numbers stay numbers, numeric strings
//! parse, booleans count as 0/1, everything else refuses. Display form is
//! what template interpolation and concat produce — absent values render
//! as the empty string.

use serde_json::Value;

/// Numeric coercion. `None` means "not a number" (the comparison using it
/// must fail closed).
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// The string form used by templates, concat, and string comparators.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            // Integral doubles render without the trailing ".0"
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Loose equality: structural match, or numeric match when both sides coerce.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_f64(left), as_f64(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

/// Bounded JSON rendering for log lines. Never panics, never unbounded.
pub fn preview_json(value: &Value, max_chars: usize) -> String {
    let mut rendered = serde_json::to_string(value).unwrap_or_default();
    if rendered.chars().count() > max_chars {
        rendered = rendered.chars().take(max_chars).collect::<String>() + "…";
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(as_f64(&json!(3.5)), Some(3.5));
        assert_eq!(as_f64(&json!("42")), Some(42.0));
        assert_eq!(as_f64(&json!(" 7 ")), Some(7.0));
        assert_eq!(as_f64(&json!(true)), Some(1.0));
        assert_eq!(as_f64(&json!("abc")), None);
        assert_eq!(as_f64(&json!(null)), None);
        assert_eq!(as_f64(&json!([1])), None);
    }

    #[test]
    fn test_display_string() {
        assert_eq!(to_display_string(&json!(null)), "");
        assert_eq!(to_display_string(&json!("x")), "x");
        assert_eq!(to_display_string(&json!(2)), "2");
        assert_eq!(to_display_string(&json!(120.0)), "120");
        assert_eq!(to_display_string(&json!(1.5)), "1.5");
        assert_eq!(to_display_string(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_loose_equality() {
        assert!(values_equal(&json!(2), &json!("2")));
        assert!(values_equal(&json!("a"), &json!("a")));
        assert!(!values_equal(&json!("a"), &json!("b")));
        assert!(!values_equal(&json!(null), &json!(0)));
    }

    #[test]
    fn test_preview_truncates() {
        let long = json!("aaaaaaaaaaaaaaaaaaaa");
        let preview = preview_json(&long, 5);
        assert!(preview.starts_with("\"aaaa"));
        assert!(preview.ends_with('…'));
    }
}
