//! Lookup caches for cross-table and cross-entity rule references
//!
//! `LookupCache` is owned by a batch run and shared between table workers:
//! dumps are immutable for the run, so parsed rows, secondary indexes and
//! resolved dump lookups live as long as the run does. `LookupSession` belongs
//! to one worker and memoizes entity-store lookups for the current record only.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::dump::{DumpParse, dump_path, read_dump_file};
use super::{SourceRecord, Value};

/// Field an entity lookup returns
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupTarget {
    /// The row's external id (`uuid` in rules)
    ExternalId,
    /// The row's display name
    Name,
    /// A path inside the row's document, without `data.`
    Path(String),
}

impl LookupTarget {
    pub fn parse(path: &str) -> Self {
        match path.trim() {
            "uuid" | "external_id" | "externalId" => LookupTarget::ExternalId,
            "name" => LookupTarget::Name,
            other => LookupTarget::Path(crate::pipeline::strip_data_prefix(other).to_string()),
        }
    }
}

/// Read access to persisted entities, used by `entity(...)` and `rel(...)` rules
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Value of `target` on the first row of `entity_type` whose document
    /// field `key_field` equals `key_value`
    async fn fetch_field(
        &self,
        entity_type: &str,
        key_field: &str,
        key_value: &str,
        target: &LookupTarget,
    ) -> Result<Option<Value>>;
}

/// Normalize a value for index keys: trimmed, lowercased text
pub fn normalize_key(value: &Value) -> String {
    value.to_text().trim().to_lowercase()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Rows of one parsed dump plus lazily built field indexes
#[derive(Debug, Default)]
pub struct TableRows {
    pub records: Vec<SourceRecord>,
    pub skipped: usize,
    /// field -> (normalized value -> first matching row)
    indexes: Mutex<HashMap<String, Arc<HashMap<String, usize>>>>,
}

impl TableRows {
    fn from_parse(parse: DumpParse) -> Self {
        TableRows {
            records: parse.records,
            skipped: parse.skipped,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Row whose `field` matches `value`, first match wins
    pub fn find(&self, field: &str, value: &Value) -> Option<&SourceRecord> {
        let key = normalize_key(value);
        if key.is_empty() {
            return None;
        }
        let index = self.index(field);
        index.get(&key).map(|&i| &self.records[i])
    }

    fn index(&self, field: &str) -> Arc<HashMap<String, usize>> {
        if let Some(existing) = lock(&self.indexes).get(field) {
            return existing.clone();
        }

        let mut index = HashMap::new();
        let mut duplicates = 0usize;
        for (i, record) in self.records.iter().enumerate() {
            let Some(v) = record.get(field) else { continue };
            let key = normalize_key(v);
            if key.is_empty() {
                continue;
            }
            if index.contains_key(&key) {
                duplicates += 1;
            } else {
                index.insert(key, i);
            }
        }
        if duplicates > 0 {
            log::debug!(
                "Index on '{}' has {} duplicate values (using first match)",
                field,
                duplicates
            );
        }

        let index = Arc::new(index);
        lock(&self.indexes).insert(field.to_string(), index.clone());
        index
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DumpMemoKey {
    table: String,
    key_field: String,
    key_value: String,
    target: String,
}

/// Run-scoped cache of parsed dumps and dump lookups
#[derive(Debug)]
pub struct LookupCache {
    dump_dir: PathBuf,
    tables: Mutex<HashMap<String, Arc<TableRows>>>,
    memo: Mutex<HashMap<DumpMemoKey, Option<Value>>>,
}

impl LookupCache {
    pub fn new(dump_dir: impl Into<PathBuf>) -> Self {
        LookupCache {
            dump_dir: dump_dir.into(),
            tables: Mutex::new(HashMap::new()),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    /// Parsed rows of a table, parsing the dump on first use
    pub fn table(&self, table: &str) -> Result<Arc<TableRows>> {
        if let Some(rows) = lock(&self.tables).get(table) {
            return Ok(rows.clone());
        }

        // parse outside the lock; a racing worker may parse the same dump once more
        let path = dump_path(&self.dump_dir, table);
        let parse = read_dump_file(&path)?;
        log::debug!(
            "Loaded dump for {}: {} records, {} skipped",
            table,
            parse.records.len(),
            parse.skipped
        );
        let rows = Arc::new(TableRows::from_parse(parse));

        let mut tables = lock(&self.tables);
        Ok(tables.entry(table.to_string()).or_insert(rows).clone())
    }

    /// `target_field` of the first `table` row whose `key_field` equals `key_value`
    pub fn lookup(
        &self,
        table: &str,
        key_field: &str,
        key_value: &Value,
        target_field: &str,
    ) -> Result<Option<Value>> {
        let memo_key = DumpMemoKey {
            table: table.to_string(),
            key_field: key_field.to_string(),
            key_value: normalize_key(key_value),
            target: target_field.to_string(),
        };
        if let Some(hit) = lock(&self.memo).get(&memo_key) {
            return Ok(hit.clone());
        }

        let rows = self.table(table)?;
        let found = rows
            .find(key_field, key_value)
            .and_then(|row| row.get(target_field).cloned());
        if found.is_none() {
            log::debug!(
                "Lookup miss: {}.{} = '{}' -> {}",
                table,
                key_field,
                key_value,
                target_field
            );
        }

        lock(&self.memo).insert(memo_key, found.clone());
        Ok(found)
    }

    /// Drop one table's rows, indexes and memoized lookups, or everything
    pub fn clear(&self, table: Option<&str>) {
        match table {
            Some(t) => {
                lock(&self.tables).remove(t);
                lock(&self.memo).retain(|k, _| k.table != t);
            }
            None => {
                lock(&self.tables).clear();
                lock(&self.memo).clear();
            }
        }
    }

    /// Parse the given tables ahead of time; returns total records loaded
    pub fn warm<S: AsRef<str>>(&self, tables: &[S]) -> Result<usize> {
        let mut total = 0;
        for table in tables {
            total += self.table(table.as_ref())?.records.len();
        }
        Ok(total)
    }

    /// Names of tables currently cached
    pub fn cached_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.tables).keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntityMemoKey {
    entity_type: String,
    key_field: String,
    key_value: String,
    target: LookupTarget,
}

/// Per-worker memo of entity-store lookups, reset for every record
///
/// Results must not outlive the record: rows written mid-run would otherwise
/// stay "not found".
#[derive(Debug, Default)]
pub struct LookupSession {
    memo: Mutex<HashMap<EntityMemoKey, Option<Value>>>,
}

impl LookupSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything memoized for the previous record
    pub fn begin_record(&self) {
        lock(&self.memo).clear();
    }

    pub(crate) fn get(
        &self,
        entity_type: &str,
        key_field: &str,
        key_value: &str,
        target: &LookupTarget,
    ) -> Option<Option<Value>> {
        lock(&self.memo)
            .get(&EntityMemoKey {
                entity_type: entity_type.to_string(),
                key_field: key_field.to_string(),
                key_value: key_value.to_string(),
                target: target.clone(),
            })
            .cloned()
    }

    pub(crate) fn put(
        &self,
        entity_type: &str,
        key_field: &str,
        key_value: &str,
        target: &LookupTarget,
        value: Option<Value>,
    ) {
        lock(&self.memo).insert(
            EntityMemoKey {
                entity_type: entity_type.to_string(),
                key_field: key_field.to_string(),
                key_value: key_value.to_string(),
                target: target.clone(),
            },
            value,
        );
    }

    pub fn len(&self) -> usize {
        lock(&self.memo).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
