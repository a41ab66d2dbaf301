//! Meta attributes stored as first-class columns

use crate::pipeline::rules::date::parse_timestamp;
use crate::pipeline::{Document, Value};

pub const DELETED_KEYS: &[&str] = &["del", "deleted"];
pub const CREATED_KEYS: &[&str] = &["create_time", "input_date", "created_at"];
pub const UPDATED_KEYS: &[&str] = &["update_time", "update_date", "updated_at"];

/// Deleted flag and timestamps pulled out of a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub deleted: i64,
    /// Unset when the projection carried no creation time
    pub created_at: Option<i64>,
    pub updated_at: i64,
}

impl Meta {
    /// Remove meta keys from both maps and resolve them
    ///
    /// Attributes win over document keys. Missing values default to not
    /// deleted and `now`.
    pub fn extract(attributes: &mut Document, document: &mut Document, now: i64) -> Self {
        let deleted = take_first(attributes, document, DELETED_KEYS)
            .map(|v| to_flag(&v))
            .unwrap_or(0);
        let created_at = take_first(attributes, document, CREATED_KEYS).and_then(|v| to_timestamp(&v));
        let updated_at = take_first(attributes, document, UPDATED_KEYS)
            .and_then(|v| to_timestamp(&v))
            .unwrap_or(now);

        Meta {
            deleted,
            created_at,
            updated_at,
        }
    }
}

fn take_first(attributes: &mut Document, document: &mut Document, keys: &[&str]) -> Option<Value> {
    let mut found = None;
    for map in [attributes, document] {
        for key in keys {
            if let Some(v) = map.remove(*key) {
                let v = Value::from_json(&v);
                if found.is_none() && !v.is_blank() {
                    found = Some(v);
                }
            }
        }
    }
    found
}

fn to_flag(value: &Value) -> i64 {
    match value {
        Value::Bool(b) => *b as i64,
        Value::Int(i) => (*i != 0) as i64,
        Value::Float(f) => (*f != 0.0) as i64,
        other => {
            let text = other.to_text().trim().to_lowercase();
            matches!(text.as_str(), "1" | "true" | "y" | "yes") as i64
        }
    }
}

/// Epoch seconds from an epoch (seconds or milliseconds) or a date string
pub fn to_timestamp(value: &Value) -> Option<i64> {
    let epoch = |n: i64| if n.abs() > 100_000_000_000 { n / 1000 } else { n };
    match value {
        Value::Int(i) => Some(epoch(*i)),
        Value::Float(f) => Some(epoch(*f as i64)),
        other => {
            let text = other.to_text();
            let text = text.trim();
            if let Ok(n) = text.parse::<i64>() {
                return Some(epoch(n));
            }
            parse_timestamp(text).map(|dt| dt.and_utc().timestamp())
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
    fn test_defaults_when_absent() {
        let mut attrs = Document::new();
        let mut document = doc(json!({"code": "F1"}));
        let meta = Meta::extract(&mut attrs, &mut document, 1_700_000_000);
        assert_eq!(meta.deleted, 0);
        assert_eq!(meta.created_at, None);
        assert_eq!(meta.updated_at, 1_700_000_000);
        assert_eq!(document.len(), 1);
    }

    #[test]
    fn test_extracted_and_removed() {
        let mut attrs = doc(json!({"del": "1"}));
        let mut document = doc(json!({
            "code": "F1",
            "input_date": "2024-01-02 00:00:00",
            "update_time": 1704153600000i64,
        }));
        let meta = Meta::extract(&mut attrs, &mut document, 0);
        assert_eq!(meta.deleted, 1);
        assert_eq!(meta.created_at, Some(1_704_153_600));
        assert_eq!(meta.updated_at, 1_704_153_600);
        assert!(attrs.is_empty());
        assert_eq!(serde_json::Value::Object(document), json!({"code": "F1"}));
    }

    #[test]
    fn test_attributes_win() {
        let mut attrs = doc(json!({"created_at": 10}));
        let mut document = doc(json!({"create_time": 20}));
        let meta = Meta::extract(&mut attrs, &mut document, 0);
        assert_eq!(meta.created_at, Some(10));
        assert!(document.is_empty());
    }
}
