//! Deterministic JSON for signing.
//!
//! Audit metadata participates in the HMAC, so its serialization must
//! be byte-stable: keys sorted recursively, separators minimal, no
//! insignificant whitespace. Scalar rendering defers to serde_json so
//! escaping and number formatting stay standard.

use serde_json::Value;

pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json string rendering handles escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
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
    fn test_keys_sorted_recursively() {
        let value = json!({
            "zeta": {"b": 2, "a": 1},
            "alpha": [{"y": true, "x": false}],
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"alpha":[{"x":false,"y":true}],"zeta":{"a":1,"b":2}}"#
        );
    }

    #[test]
    fn test_no_insignificant_whitespace() {
        let value = json!({"k": [1, 2, 3], "s": "a b"});
        assert_eq!(canonical_json(&value), r#"{"k":[1,2,3],"s":"a b"}"#);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(42)), "42");
        assert_eq!(canonical_json(&json!("quo\"te")), r#""quo\"te""#);
    }

    #[test]
    fn test_stable_across_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
