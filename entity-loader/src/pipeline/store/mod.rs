//! Entity document store
//!
//! Projected documents are persisted under a business key that lives inside
//! the document itself. Uniqueness of (type, key value) is enforced here,
//! not by the database.

mod dialect;
mod external_id;
mod merge;
mod meta;
mod sql;

pub use dialect::JsonDialect;
pub use external_id::{EXTERNAL_ID_LEN, new_external_id};
pub use merge::deep_merge;
pub use meta::{Meta, to_timestamp};
pub use sql::{ENTITY_TABLE, SqlEntityStore};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::rules::lookup_path;
use super::{Document, KeySpec, MappingResult, remove_path};

/// How an upsert treats existing and missing rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert only when no row has the key
    CreateOnly,
    /// Update only when a row has the key
    UpdateOnly,
    /// Update when found, insert otherwise
    #[default]
    Upsert,
}

impl WriteMode {
    pub fn allows_insert(&self) -> bool {
        !matches!(self, WriteMode::UpdateOnly)
    }

    pub fn allows_update(&self) -> bool {
        !matches!(self, WriteMode::CreateOnly)
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::CreateOnly => write!(f, "create_only"),
            WriteMode::UpdateOnly => write!(f, "update_only"),
            WriteMode::Upsert => write!(f, "upsert"),
        }
    }
}

/// Type-scoped delete flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeleteMode {
    /// Set the deleted flag
    Logical,
    /// Remove the rows
    Physical,
}

/// What one upsert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Created { external_id: String },
    Updated { external_id: String },
    /// The write mode forbade the write
    Skipped,
}

impl WriteOutcome {
    /// Rows written: 1 for a create or update, 0 otherwise
    pub fn rows_written(&self) -> u64 {
        match self {
            WriteOutcome::Created { .. } | WriteOutcome::Updated { .. } => 1,
            WriteOutcome::Skipped => 0,
        }
    }
}

/// A persisted entity row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRow {
    pub external_id: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub document: Document,
    pub deleted: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A projection reshaped for writing
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWrite {
    pub entity_type: String,
    pub key_field: String,
    /// Text of the key field; `None` when the document lacks it
    pub key_value: Option<String>,
    /// `None` when the spec excludes `name`
    pub name: Option<String>,
    pub document: Document,
    pub meta: Meta,
}

impl PreparedWrite {
    /// Strip excluded paths, pull out meta attributes and resolve the key
    pub fn new(spec: &KeySpec, result: &MappingResult, now: i64) -> Self {
        let mut document = result.document.clone();
        let mut attributes = result.attributes.clone();

        for path in spec.excluded_paths() {
            remove_path(&mut document, path);
        }
        let meta = Meta::extract(&mut attributes, &mut document, now);

        let key_value = lookup_path(&document, &spec.key_field)
            .or_else(|| lookup_path(&attributes, &spec.key_field))
            .filter(|v| !v.is_blank())
            .map(|v| v.to_text());

        let entity_type = if result.entity_type.trim().is_empty() {
            spec.entity_type.clone()
        } else {
            result.entity_type.clone()
        };

        PreparedWrite {
            entity_type,
            key_field: spec.key_field.clone(),
            key_value,
            name: (!spec.suppresses_name()).then(|| result.display_name.clone()),
            document,
            meta,
        }
    }

    /// The row this write would insert
    pub fn to_row(&self, external_id: impl Into<String>, namespace: &str) -> EntityRow {
        EntityRow {
            external_id: external_id.into(),
            namespace: namespace.to_string(),
            entity_type: self.entity_type.clone(),
            name: self.name.clone().unwrap_or_default(),
            document: self.document.clone(),
            deleted: self.meta.deleted,
            created_at: self.meta.created_at.unwrap_or(self.meta.updated_at),
            updated_at: self.meta.updated_at,
        }
    }
}

/// Persistence of projected entities
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Write one projection under the spec's business key
    async fn upsert(&self, spec: &KeySpec, result: &MappingResult, mode: WriteMode) -> Result<WriteOutcome>;

    /// First row of `entity_type` whose document `key_field` equals `key_value`
    async fn find(&self, entity_type: &str, key_field: &str, key_value: &str) -> Result<Option<EntityRow>>;

    /// Flag or delete every row of a type; returns rows affected
    async fn purge_type(&self, entity_type: &str, mode: DeleteMode) -> Result<u64>;

    /// Namespace written to new rows
    fn namespace(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(doc: serde_json::Value) -> MappingResult {
        MappingResult {
            document: doc.as_object().cloned().unwrap(),
            attributes: Document::new(),
            display_name: "Alpha".to_string(),
            entity_type: String::new(),
        }
    }

    #[test]
    fn test_prepare_strips_exclusions_keeps_key() {
        let spec = KeySpec::parse("fund(code)[tmp,code,name]").unwrap();
        let prepared = PreparedWrite::new(
            &spec,
            &result(json!({"code": "F1", "tmp": 1, "create_time": 5})),
            100,
        );
        assert_eq!(prepared.entity_type, "fund");
        assert_eq!(prepared.key_value.as_deref(), Some("F1"));
        assert_eq!(prepared.name, None);
        assert_eq!(serde_json::Value::Object(prepared.document.clone()), json!({"code": "F1"}));
        assert_eq!(prepared.meta.created_at, Some(5));
        assert_eq!(prepared.meta.updated_at, 100);
    }

    #[test]
    fn test_prepare_type_override_and_missing_key() {
        let spec = KeySpec::simple("fund");
        let mut r = result(json!({"code": "F1"}));
        r.entity_type = "fund_share".to_string();
        let prepared = PreparedWrite::new(&spec, &r, 0);
        assert_eq!(prepared.entity_type, "fund_share");
        assert_eq!(prepared.key_value, None);
        assert_eq!(prepared.name.as_deref(), Some("Alpha"));
    }

    #[test]
    fn test_to_row_defaults_created_to_updated() {
        let prepared = PreparedWrite::new(&KeySpec::simple("fund"), &result(json!({"id": 1})), 42);
        let row = prepared.to_row("(preview)", "ns");
        assert_eq!(row.created_at, 42);
        assert_eq!(row.deleted, 0);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["externalId"], "(preview)");
        assert_eq!(json["type"], "fund");
    }

    #[test]
    fn test_write_mode_serde() {
        let mode: WriteMode = serde_json::from_str("\"create_only\"").unwrap();
        assert_eq!(mode, WriteMode::CreateOnly);
        assert_eq!(WriteMode::default(), WriteMode::Upsert);
        assert!(!WriteMode::UpdateOnly.allows_insert());
        assert!(!WriteMode::CreateOnly.allows_update());
    }
}
