//! Canonical JSON serialization used for content-address hashing.
//!
//! Object keys are sorted and the output carries no insignificant
//! whitespace, so two equivalent values always hash to the same bytes
//! regardless of field insertion order.

use serde_json::Value;

/// Serialize `value` to its canonical byte form: sorted object keys, no
/// inter-token whitespace.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(&Value::String((*k).clone()), out);
                out.push(b':');
                write_canonical(v, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(v, out);
            }
            out.push(b']');
        }
        other => {
            // serde_json's compact writer already omits whitespace for
            // scalars; reuse it rather than reimplementing number/string
            // escaping.
            out.extend_from_slice(serde_json::to_string(other).unwrap().as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(to_canonical_bytes(&a), to_canonical_bytes(&b));
    }

    #[test]
    fn no_whitespace_in_output() {
        let v = json!({"a": [1, 2, 3]});
        let bytes = to_canonical_bytes(&v);
        assert_eq!(bytes, br#"{"a":[1,2,3]}"#);
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let a = json!({"outer": {"z": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "z": 1}});
        assert_eq!(to_canonical_bytes(&a), to_canonical_bytes(&b));
    }
}
