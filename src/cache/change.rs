//! Change detection between two payloads
//!
//! Payloads are compared through a canonical serialization with object keys
//! sorted, so key order never matters while array order always does.

use serde_json::Value;

/// Returns true if `new` differs materially from `old`
///
/// With no baseline on either side there is nothing to compare against and
/// the result is `false`. Callers should be aware that the first population
/// of a key is therefore never reported as a change.
pub fn changed(old: Option<&Value>, new: Option<&Value>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => canonical(old) != canonical(new),
        _ => false,
    }
}

/// Serializes `value` with object keys in sorted order
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_payloads_are_unchanged() {
        let payload = json!({"yields": {"10Y": 4.1, "2Y": 3.9}, "curve": [1, 2, 3]});
        assert!(!changed(Some(&payload), Some(&payload)));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();

        assert!(!changed(Some(&a), Some(&b)));
        assert_eq!(canonical(&a), r#"{"a":{"x":3,"y":2},"b":1}"#);
    }

    #[test]
    fn test_value_difference_is_a_change() {
        let old = json!({"CPI": {"current": 310.1}});
        let new = json!({"CPI": {"current": 310.2}});
        assert!(changed(Some(&old), Some(&new)));
    }

    #[test]
    fn test_added_or_removed_key_is_a_change() {
        let old = json!({"CPI": 1});
        let new = json!({"CPI": 1, "PPI": 2});
        assert!(changed(Some(&old), Some(&new)));
        assert!(changed(Some(&new), Some(&old)));
    }

    #[test]
    fn test_array_order_is_a_change() {
        let old = json!([1, 2, 3]);
        let new = json!([3, 2, 1]);
        assert!(changed(Some(&old), Some(&new)));
    }

    #[test]
    fn test_missing_baseline_is_not_a_change() {
        let payload = json!({"a": 1});
        assert!(!changed(None, Some(&payload)));
        assert!(!changed(Some(&payload), None));
        assert!(!changed(None, None));
    }

    #[test]
    fn test_strings_are_escaped_in_canonical_form() {
        let value = json!({"quote\"key": "line\nbreak"});
        assert_eq!(canonical(&value), r#"{"quote\"key":"line\nbreak"}"#);
    }
}
