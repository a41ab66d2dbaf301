//! Entity store over a sqlx connection pool
//!
//! Runs against SQLite or MySQL through `sqlx::AnyPool`; the engine only
//! matters for the JSON extraction in the key predicate (see `JsonDialect`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow, install_default_drivers};
use sqlx::{AnyPool, Row};

use super::{
    DeleteMode, EntityRow, EntityStore, JsonDialect, PreparedWrite, WriteMode, WriteOutcome, deep_merge,
    new_external_id,
};
use crate::pipeline::cache::{EntitySource, LookupTarget};
use crate::pipeline::rules::lookup_path;
use crate::pipeline::{Document, KeySpec, MappingResult, Value};

/// Default entity table name
pub const ENTITY_TABLE: &str = "entity";

const COLUMNS: &str = "external_id, namespace, type, name, document, deleted, created_at, updated_at";

pub struct SqlEntityStore {
    pool: AnyPool,
    dialect: JsonDialect,
    table: String,
    namespace: String,
}

/// Accept either a sqlx URL or a bare SQLite file path
fn normalize_url(url: &str) -> String {
    if url.contains("://") || url.starts_with("sqlite:") {
        url.to_string()
    } else {
        format!("sqlite://{}?mode=rwc", url)
    }
}

impl SqlEntityStore {
    /// Connect and make sure the entity table exists; the dialect follows the URL scheme
    pub async fn connect(url: &str, namespace: &str) -> Result<Self> {
        let url = normalize_url(url);
        Self::connect_as(&url, JsonDialect::from_url(&url), namespace).await
    }

    pub async fn connect_as(url: &str, dialect: JsonDialect, namespace: &str) -> Result<Self> {
        install_default_drivers();
        let url = normalize_url(url);
        // every in-memory SQLite connection is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await
            .with_context(|| format!("Failed to connect to entity store at {}", url))?;

        let store = Self::with_pool(pool, dialect, namespace);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn with_pool(pool: AnyPool, dialect: JsonDialect, namespace: &str) -> Self {
        SqlEntityStore {
            pool,
            dialect,
            table: ENTITY_TABLE.to_string(),
            namespace: namespace.to_string(),
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> JsonDialect {
        self.dialect
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in self.dialect.schema_statements(&self.table) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .context("Failed to create entity table")?;
        }
        Ok(())
    }

    /// Number of rows of a type, deleted ones included
    pub async fn count(&self, entity_type: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {} WHERE type = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(entity_type)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count entities")?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    fn select_keyed_sql(&self) -> String {
        format!(
            "SELECT id, {} FROM {} WHERE {} ORDER BY created_at, id LIMIT 1",
            COLUMNS,
            self.table,
            self.dialect.key_predicate()
        )
    }
}

fn row_to_entity(row: &AnyRow) -> Result<EntityRow> {
    let document: String = row.try_get("document")?;
    let document: Document = serde_json::from_str(&document).context("Stored document is not a JSON object")?;
    Ok(EntityRow {
        external_id: row.try_get("external_id")?,
        namespace: row.try_get("namespace")?,
        entity_type: row.try_get("type")?,
        name: row.try_get("name")?,
        document,
        deleted: row.try_get::<i64, _>("deleted")?,
        created_at: row.try_get::<i64, _>("created_at")?,
        updated_at: row.try_get::<i64, _>("updated_at")?,
    })
}

#[async_trait]
impl EntityStore for SqlEntityStore {
    async fn upsert(&self, spec: &KeySpec, result: &MappingResult, mode: WriteMode) -> Result<WriteOutcome> {
        let now = chrono::Utc::now().timestamp();
        let prepared = PreparedWrite::new(spec, result, now);

        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;

        let existing = match &prepared.key_value {
            Some(key) => {
                let sql = self.select_keyed_sql();
                let row = sqlx::query(&sql)
                    .bind(&prepared.entity_type)
                    .bind(self.dialect.json_path(&prepared.key_field))
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("Failed to look up entity by key")?;
                match row {
                    Some(row) => Some((row.try_get::<i64, _>("id")?, row_to_entity(&row)?)),
                    None => None,
                }
            }
            None => None,
        };

        let outcome = match existing {
            Some((row_id, stored)) if mode.allows_update() => {
                let mut document = stored.document;
                deep_merge(&mut document, prepared.document);
                let name = match prepared.name {
                    Some(name) if !name.trim().is_empty() => name,
                    _ => stored.name,
                };
                let created_at = prepared.meta.created_at.unwrap_or(stored.created_at);
                let document = serde_json::to_string(&document).context("Failed to serialize document")?;

                let sql = format!(
                    "UPDATE {} SET name = ?, document = ?, deleted = ?, created_at = ?, updated_at = ? WHERE id = ?",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(name)
                    .bind(document)
                    .bind(prepared.meta.deleted)
                    .bind(created_at)
                    .bind(prepared.meta.updated_at)
                    .bind(row_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to update entity")?;

                WriteOutcome::Updated {
                    external_id: stored.external_id,
                }
            }
            Some((_, stored)) => {
                log::debug!(
                    "Skipping {} '{}': exists as {} ({})",
                    prepared.entity_type,
                    prepared.key_value.as_deref().unwrap_or_default(),
                    stored.external_id,
                    mode
                );
                WriteOutcome::Skipped
            }
            None if mode.allows_insert() => {
                let row = prepared.to_row(new_external_id(), &self.namespace);
                let document = serde_json::to_string(&row.document).context("Failed to serialize document")?;

                let sql = format!(
                    "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    self.table, COLUMNS
                );
                sqlx::query(&sql)
                    .bind(&row.external_id)
                    .bind(&row.namespace)
                    .bind(&row.entity_type)
                    .bind(&row.name)
                    .bind(document)
                    .bind(row.deleted)
                    .bind(row.created_at)
                    .bind(row.updated_at)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to insert entity")?;

                WriteOutcome::Created {
                    external_id: row.external_id,
                }
            }
            None => {
                log::debug!(
                    "Skipping {} '{}': not found ({})",
                    prepared.entity_type,
                    prepared.key_value.as_deref().unwrap_or_default(),
                    mode
                );
                WriteOutcome::Skipped
            }
        };

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(outcome)
    }

    async fn find(&self, entity_type: &str, key_field: &str, key_value: &str) -> Result<Option<EntityRow>> {
        let sql = self.select_keyed_sql();
        let row = sqlx::query(&sql)
            .bind(entity_type)
            .bind(self.dialect.json_path(key_field))
            .bind(key_value)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up entity by key")?;
        row.as_ref().map(row_to_entity).transpose()
    }

    async fn purge_type(&self, entity_type: &str, mode: DeleteMode) -> Result<u64> {
        let result = match mode {
            DeleteMode::Logical => {
                let sql = format!("UPDATE {} SET deleted = 1, updated_at = ? WHERE type = ?", self.table);
                sqlx::query(&sql)
                    .bind(chrono::Utc::now().timestamp())
                    .bind(entity_type)
                    .execute(&self.pool)
                    .await
            }
            DeleteMode::Physical => {
                let sql = format!("DELETE FROM {} WHERE type = ?", self.table);
                sqlx::query(&sql).bind(entity_type).execute(&self.pool).await
            }
        }
        .with_context(|| format!("Failed to purge entities of type {}", entity_type))?;

        log::info!("Purged {} {} rows ({:?})", result.rows_affected(), entity_type, mode);
        Ok(result.rows_affected())
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl EntitySource for SqlEntityStore {
    async fn fetch_field(
        &self,
        entity_type: &str,
        key_field: &str,
        key_value: &str,
        target: &LookupTarget,
    ) -> Result<Option<Value>> {
        let Some(row) = self.find(entity_type, key_field, key_value).await? else {
            return Ok(None);
        };
        Ok(match target {
            LookupTarget::ExternalId => Some(Value::String(row.external_id)),
            LookupTarget::Name => Some(Value::String(row.name)),
            LookupTarget::Path(path) => lookup_path(&row.document, path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqlEntityStore {
        SqlEntityStore::connect("sqlite::memory:", "test").await.unwrap()
    }

    fn projection(name: &str, doc: serde_json::Value) -> MappingResult {
        MappingResult {
            document: doc.as_object().cloned().unwrap(),
            attributes: Document::new(),
            display_name: name.to_string(),
            entity_type: String::new(),
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("data/entities.db"), "sqlite://data/entities.db?mode=rwc");
        assert_eq!(normalize_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_url("mysql://u@h/db"), "mysql://u@h/db");
    }

    #[tokio::test]
    async fn test_disjoint_upserts_merge() {
        let store = store().await;
        let spec = KeySpec::parse("fund(code)").unwrap();

        let first = store
            .upsert(&spec, &projection("Alpha", json!({"code": "F1", "nav": 1.5})), WriteMode::Upsert)
            .await
            .unwrap();
        assert!(matches!(first, WriteOutcome::Created { .. }));

        let second = store
            .upsert(&spec, &projection("", json!({"code": "F1", "manager": {"name": "Bo"}})), WriteMode::Upsert)
            .await
            .unwrap();
        assert!(matches!(second, WriteOutcome::Updated { .. }));

        let row = store.find("fund", "code", "F1").await.unwrap().unwrap();
        assert_eq!(
            serde_json::Value::Object(row.document),
            json!({"code": "F1", "nav": 1.5, "manager": {"name": "Bo"}})
        );
        assert_eq!(row.name, "Alpha");
        assert_eq!(row.namespace, "test");
        assert_eq!(store.count("fund").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_only_missing_writes_nothing() {
        let store = store().await;
        let spec = KeySpec::simple("fund");
        let outcome = store
            .upsert(&spec, &projection("A", json!({"id": 1})), WriteMode::UpdateOnly)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Skipped);
        assert_eq!(outcome.rows_written(), 0);
        assert_eq!(store.count("fund").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_only_existing_writes_nothing() {
        let store = store().await;
        let spec = KeySpec::simple("fund");
        store
            .upsert(&spec, &projection("A", json!({"id": 1, "v": "old"})), WriteMode::CreateOnly)
            .await
            .unwrap();
        let outcome = store
            .upsert(&spec, &projection("B", json!({"id": 1, "v": "new"})), WriteMode::CreateOnly)
            .await
            .unwrap();
        assert_eq!(outcome.rows_written(), 0);

        let row = store.find("fund", "id", "1").await.unwrap().unwrap();
        assert_eq!(row.document["v"], "old");
        assert_eq!(row.name, "A");
    }

    #[tokio::test]
    async fn test_meta_columns_and_created_at_kept() {
        let store = store().await;
        let spec = KeySpec::simple("fund");
        store
            .upsert(&spec, &projection("A", json!({"id": 7, "create_time": 1000, "del": 1})), WriteMode::Upsert)
            .await
            .unwrap();
        store
            .upsert(&spec, &projection("A", json!({"id": 7, "update_time": 2000})), WriteMode::Upsert)
            .await
            .unwrap();

        let row = store.find("fund", "id", "7").await.unwrap().unwrap();
        assert_eq!(row.created_at, 1000);
        assert_eq!(row.updated_at, 2000);
        assert_eq!(row.deleted, 0);
        assert!(!row.document.contains_key("create_time"));
    }

    #[tokio::test]
    async fn test_nested_key_and_lookup_targets() {
        let store = store().await;
        let spec = KeySpec::parse("fund(data.meta.code)").unwrap();
        let outcome = store
            .upsert(&spec, &projection("Alpha", json!({"meta": {"code": "X"}, "firm_id": 9})), WriteMode::Upsert)
            .await
            .unwrap();
        let WriteOutcome::Created { external_id } = outcome else {
            panic!("expected create");
        };

        let uuid = store
            .fetch_field("fund", "meta.code", "X", &LookupTarget::ExternalId)
            .await
            .unwrap();
        assert_eq!(uuid, Some(Value::String(external_id)));
        let firm = store
            .fetch_field("fund", "meta.code", "X", &LookupTarget::Path("firm_id".into()))
            .await
            .unwrap();
        assert_eq!(firm, Some(Value::Int(9)));
        let miss = store
            .fetch_field("fund", "meta.code", "Y", &LookupTarget::Name)
            .await
            .unwrap();
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_burst_of_inserts_all_created() {
        let store = store().await;
        let spec = KeySpec::simple("fund");
        for id in 0..500 {
            let outcome = store
                .upsert(&spec, &projection("x", json!({"id": id})), WriteMode::Upsert)
                .await
                .unwrap();
            assert!(matches!(outcome, WriteOutcome::Created { .. }));
        }
        assert_eq!(store.count("fund").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_repeated_external_id_does_not_block_insert_or_update() {
        let store = store().await;
        let spec = KeySpec::simple("fund");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ('dup', 'test', 'fund', 'a', '{{\"id\": 1}}', 0, 1, 1)",
            ENTITY_TABLE, COLUMNS
        );
        sqlx::query(&sql).execute(store.pool()).await.unwrap();
        let sql = sql.replace("\"id\": 1", "\"id\": 2").replace("'a'", "'b'");
        sqlx::query(&sql).execute(store.pool()).await.unwrap();
        assert_eq!(store.count("fund").await.unwrap(), 2);

        // only the keyed row changes even though both share an external id
        store
            .upsert(&spec, &projection("renamed", json!({"id": 2})), WriteMode::UpdateOnly)
            .await
            .unwrap();
        assert_eq!(store.find("fund", "id", "1").await.unwrap().unwrap().name, "a");
        assert_eq!(store.find("fund", "id", "2").await.unwrap().unwrap().name, "renamed");
    }

    #[tokio::test]
    async fn test_purge_type() {
        let store = store().await;
        let spec = KeySpec::simple("fund");
        for id in 1..=3 {
            store
                .upsert(&spec, &projection("x", json!({"id": id})), WriteMode::Upsert)
                .await
                .unwrap();
        }
        assert_eq!(store.purge_type("fund", DeleteMode::Logical).await.unwrap(), 3);
        let row = store.find("fund", "id", "2").await.unwrap().unwrap();
        assert_eq!(row.deleted, 1);

        assert_eq!(store.purge_type("fund", DeleteMode::Physical).await.unwrap(), 3);
        assert_eq!(store.count("fund").await.unwrap(), 0);
    }
}
