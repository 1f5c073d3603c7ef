//! Canonical JSON rendering used for payload signatures.
//!
//! Signatures are computed over a byte-stable form: object keys sorted
//! lexicographically at every nesting level, no insignificant whitespace.
//! Both the signer and the verifier must go through this path.

use serde_json::Value;

/// Serialize a JSON value with all object keys sorted.
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are plain strings; reuse serde_json's escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sorts_keys_at_every_level() {
        let value = json!({
            "zeta": {"b": 2, "a": 1},
            "alpha": [ {"y": true, "x": false} ],
        });
        assert_eq!(
            to_canonical_json(&value),
            r#"{"alpha":[{"x":false,"y":true}],"zeta":{"a":1,"b":2}}"#
        );
    }

    #[test]
    fn stable_across_insertion_order() {
        let a = json!({"task_id": "t1", "agent_id": "sam", "data": {"k": 1}});
        let b = json!({"data": {"k": 1}, "agent_id": "sam", "task_id": "t1"});
        assert_eq!(to_canonical_json(&a), to_canonical_json(&b));
    }

    #[test]
    fn scalars_and_arrays_pass_through() {
        assert_eq!(to_canonical_json(&json!(null)), "null");
        assert_eq!(to_canonical_json(&json!([3, 1, 2])), "[3,1,2]");
        assert_eq!(to_canonical_json(&json!("a\"b")), r#""a\"b""#);
    }
}
