//! Dot-path writes into nested documents

use super::Document;

/// Write `value` at a dot path, creating intermediate objects
///
/// A non-object value sitting on the path is replaced by an object.
pub fn set_path(doc: &mut Document, path: &str, value: serde_json::Value) {
    let mut segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some(last) = segments.pop() else { return };

    let mut current = doc;
    for seg in segments {
        let slot = current
            .entry(seg.to_string())
            .or_insert_with(|| serde_json::Value::Object(Document::new()));
        if !slot.is_object() {
            *slot = serde_json::Value::Object(Document::new());
        }
        current = match slot {
            serde_json::Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Remove the value at a dot path; returns it if present
pub fn remove_path(doc: &mut Document, path: &str) -> Option<serde_json::Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            serde_json::Value::Object(child) => remove_path(child, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_path_creates_parents() {
        let mut doc = Document::new();
        set_path(&mut doc, "fund.meta.code", json!("F1"));
        set_path(&mut doc, "fund.name", json!("Alpha"));
        assert_eq!(
            serde_json::Value::Object(doc),
            json!({"fund": {"meta": {"code": "F1"}, "name": "Alpha"}})
        );
    }

    #[test]
    fn test_set_path_replaces_scalar_parent() {
        let mut doc = Document::new();
        set_path(&mut doc, "a", json!(1));
        set_path(&mut doc, "a.b", json!(2));
        assert_eq!(serde_json::Value::Object(doc), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_remove_path() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "d": 3}).as_object().cloned().unwrap();
        assert_eq!(remove_path(&mut doc, "a.b"), Some(json!(1)));
        assert_eq!(remove_path(&mut doc, "d"), Some(json!(3)));
        assert_eq!(remove_path(&mut doc, "a.x.y"), None);
        assert_eq!(serde_json::Value::Object(doc), json!({"a": {"c": 2}}));
    }
}
