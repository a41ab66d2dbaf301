//! Deep merge of entity documents

use crate::pipeline::Document;

/// Merge `incoming` onto `stored`
///
/// Objects merge key by key, recursively. Scalars and arrays in `incoming`
/// replace whatever `stored` held.
pub fn deep_merge(stored: &mut Document, incoming: Document) {
    for (key, value) in incoming {
        match (stored.get_mut(&key), value) {
            (Some(serde_json::Value::Object(old)), serde_json::Value::Object(new)) => {
                deep_merge(old, new);
            }
            (_, value) => {
                stored.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_disjoint_fields_union() {
        let mut stored = doc(json!({"id": 1, "code": "F1"}));
        deep_merge(&mut stored, doc(json!({"id": 1, "nav": 1.5})));
        assert_eq!(
            serde_json::Value::Object(stored),
            json!({"id": 1, "code": "F1", "nav": 1.5})
        );
    }

    #[test]
    fn test_nested_objects_merge() {
        let mut stored = doc(json!({"fund": {"code": "F1", "tags": ["a", "b"]}}));
        deep_merge(&mut stored, doc(json!({"fund": {"name": "Alpha", "tags": ["c"]}})));
        assert_eq!(
            serde_json::Value::Object(stored),
            json!({"fund": {"code": "F1", "tags": ["c"], "name": "Alpha"}})
        );
    }

    #[test]
    fn test_scalar_replaces_object() {
        let mut stored = doc(json!({"a": {"b": 1}}));
        deep_merge(&mut stored, doc(json!({"a": "flat"})));
        assert_eq!(serde_json::Value::Object(stored), json!({"a": "flat"}));
    }
}
