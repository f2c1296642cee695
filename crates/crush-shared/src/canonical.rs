use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Renders a JSON value in canonical form: compact, with object keys in
/// lexicographic order at every nesting level. Two values that differ only
/// in key order render identically, which is what permission-grant equality
/// is keyed on. Array element order is significant and preserved.
pub fn deterministic_stringify(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            // A BTreeMap view gives the sorted iteration order for free.
            let ordered: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (index, (key, child)) in ordered.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(out, child);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 over the canonical rendering, as lowercase hex.
pub fn hash_value(value: &serde_json::Value) -> String {
    hex::encode(Sha256::digest(deterministic_stringify(value).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(deterministic_stringify(&a), deterministic_stringify(&b));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn array_order_matters() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn output_is_compact_sorted_json() {
        let v = json!({"z": null, "a": [true, "s"]});
        assert_eq!(deterministic_stringify(&v), r#"{"a":[true,"s"],"z":null}"#);
    }

    #[test]
    fn scalars_and_escapes_render_as_plain_json() {
        assert_eq!(deterministic_stringify(&json!(1.5)), "1.5");
        assert_eq!(deterministic_stringify(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(
            deterministic_stringify(&json!({"k\"ey": []})),
            r#"{"k\"ey":[]}"#
        );
    }
}
