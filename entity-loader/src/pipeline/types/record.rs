//! Source records parsed from dump statements

use super::Value;

/// One row of a dump: column name -> value, in declared column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    fields: Vec<(String, Value)>,
}

impl SourceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel column/value lists. Returns None on arity mismatch.
    pub fn from_columns(columns: Vec<String>, values: Vec<Value>) -> Option<Self> {
        if columns.len() != values.len() {
            return None;
        }
        Some(SourceRecord {
            fields: columns.into_iter().zip(values).collect(),
        })
    }

    /// Set a column, replacing an existing value in place
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some((_, v)) => *v = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object preserving column order
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (column, value) in &self.fields {
            map.insert(column.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns_arity_mismatch() {
        let cols = vec!["id".to_string(), "name".to_string()];
        assert!(SourceRecord::from_columns(cols, vec![Value::Int(1)]).is_none());
    }

    #[test]
    fn test_column_order_preserved() {
        let cols = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let vals = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let rec = SourceRecord::from_columns(cols, vals).unwrap();
        assert_eq!(rec.columns().collect::<Vec<_>>(), vec!["b", "a", "c"]);

        let json = rec.to_json();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_insert_replaces() {
        let mut rec = SourceRecord::new();
        rec.insert("id", Value::Int(1));
        rec.insert("id", Value::Int(2));
        assert_eq!(rec.len(), 1);
        assert_eq!(rec.get("id"), Some(&Value::Int(2)));
    }
}
