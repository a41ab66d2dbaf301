//! Field resolution against a partially projected record

use crate::pipeline::{Document, SourceRecord, Value, strip_data_prefix};

/// Read-only view of one record while it is being projected
///
/// Values already projected shadow the raw source columns, so later rules see
/// what earlier mappings produced.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    pub table: &'a str,
    pub source: &'a SourceRecord,
    pub attributes: &'a Document,
    pub document: &'a Document,
}

impl<'a> RecordView<'a> {
    pub fn new(
        table: &'a str,
        source: &'a SourceRecord,
        attributes: &'a Document,
        document: &'a Document,
    ) -> Self {
        RecordView {
            table,
            source,
            attributes,
            document,
        }
    }

    /// Resolve a field reference
    ///
    /// Accepts `record.<f>`, `data.<path>` (document only), `<table>.<f>` for
    /// the current table, plain column names and dotted paths into nested
    /// values.
    pub fn get(&self, path: &str) -> Option<Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        if let Some(rest) = path.strip_prefix("record.") {
            return self.get(rest);
        }
        if path.starts_with("data.") {
            return lookup_path(self.document, strip_data_prefix(path));
        }
        if let Some(value) = self.get_exact(path) {
            return Some(value);
        }

        let (head, tail) = match path.split_once('.') {
            Some(split) => split,
            None => return None,
        };
        if head == self.table {
            return self.get(tail);
        }
        let base = self.get_exact(head)?;
        walk_json(&base.to_json(), tail)
    }

    /// Whether a reference resolves to anything
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    fn get_exact(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.attributes.get(key) {
            return Some(Value::from_json(v));
        }
        if let Some(v) = self.document.get(key) {
            return Some(Value::from_json(v));
        }
        self.source.get(key).cloned()
    }
}

/// Read a dot path out of a document
pub fn lookup_path(doc: &Document, path: &str) -> Option<Value> {
    let (head, tail) = match path.split_once('.') {
        Some((h, t)) => (h, Some(t)),
        None => (path, None),
    };
    let first = doc.get(head)?;
    match tail {
        Some(rest) => walk_json(first, rest),
        None => Some(Value::from_json(first)),
    }
}

fn walk_json(root: &serde_json::Value, path: &str) -> Option<Value> {
    let mut current = root;
    for seg in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(seg)?,
            serde_json::Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(Value::from_json(current))
}
