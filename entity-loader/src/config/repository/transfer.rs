//! Export and import of the whole mapping configuration as JSON

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;

use super::mappings::list_all_field_mappings;
use super::scripts::{TableScript, list_table_scripts};
use super::tables::{TableMapping, list_tables};
use crate::pipeline::FieldMapping;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Every table registration, field mapping and script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    pub version: u32,
    pub exported_at: String,
    pub tables: Vec<TableMapping>,
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub scripts: Vec<TableScript>,
}

/// Counts of rows written by an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub tables: usize,
    pub field_mappings: usize,
    pub scripts: usize,
}

pub async fn export_all(pool: &SqlitePool) -> Result<MappingSnapshot> {
    let mut field_mappings = list_all_field_mappings(pool).await?;
    for m in &mut field_mappings {
        m.id = None;
    }

    Ok(MappingSnapshot {
        version: SNAPSHOT_VERSION,
        exported_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        tables: list_tables(pool, true).await?,
        field_mappings,
        scripts: list_table_scripts(pool).await?,
    })
}

/// Replace the whole configuration with a snapshot, in one transaction
pub async fn import_all(pool: &SqlitePool, snapshot: &MappingSnapshot) -> Result<ImportSummary> {
    if snapshot.version > SNAPSHOT_VERSION {
        anyhow::bail!(
            "Snapshot version {} is newer than supported version {}",
            snapshot.version,
            SNAPSHOT_VERSION
        );
    }

    let mut tx = pool.begin().await.context("Failed to start transaction")?;

    for table in ["field_map", "table_map", "table_scripts"] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear {}", table))?;
    }

    for table in &snapshot.tables {
        sqlx::query(
            r#"
            INSERT INTO table_map (source_table, target_entity, priority, disabled, description)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&table.source_table)
        .bind(&table.target_entity)
        .bind(table.priority)
        .bind(table.disabled as i64)
        .bind(&table.description)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert table {}", table.source_table))?;
    }

    for mapping in &snapshot.field_mappings {
        sqlx::query(
            r#"
            INSERT INTO field_map (table_name, target_entity, source_field, target_paths, rule, enabled, order_idx)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&mapping.source_table)
        .bind(&mapping.target_entity)
        .bind(&mapping.source_field)
        .bind(&mapping.target_paths)
        .bind(&mapping.rule)
        .bind(mapping.enabled as i64)
        .bind(mapping.order_index)
        .execute(&mut *tx)
        .await
        .with_context(|| {
            format!(
                "Failed to insert mapping {}.{}",
                mapping.source_table, mapping.source_field
            )
        })?;
    }

    for script in &snapshot.scripts {
        sqlx::query("INSERT INTO table_scripts (source_table, target_entity, script) VALUES (?, ?, ?)")
            .bind(&script.source_table)
            .bind(&script.target_entity)
            .bind(&script.script)
            .execute(&mut *tx)
            .await
            .context("Failed to insert table script")?;
    }

    tx.commit().await.context("Failed to commit transaction")?;

    Ok(ImportSummary {
        tables: snapshot.tables.len(),
        field_mappings: snapshot.field_mappings.len(),
        scripts: snapshot.scripts.len(),
    })
}

pub async fn export_to_file(pool: &SqlitePool, path: &Path) -> Result<MappingSnapshot> {
    let snapshot = export_all(pool).await?;
    let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(snapshot)
}

pub async fn import_from_file(pool: &SqlitePool, path: &Path) -> Result<ImportSummary> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: MappingSnapshot = serde_json::from_str(&text).context("Invalid mapping snapshot")?;
    import_all(pool, &snapshot).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::{mappings, scripts, tables, test_pool};

    async fn populate(pool: &SqlitePool) {
        tables::save_table_mapping(pool, &TableMapping::new("ct_fund", "fund(code)"))
            .await
            .unwrap();
        mappings::upsert_field_mapping(
            pool,
            &FieldMapping::new("code", "data.code").scoped("ct_fund", "fund(code)"),
        )
        .await
        .unwrap();
        scripts::save_table_script(pool, "ct_fund", "fund(code)", "record.x = 1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_export_import_replaces_everything() {
        let source = test_pool().await;
        populate(&source).await;
        let snapshot = export_all(&source).await.unwrap();
        assert_eq!(snapshot.tables.len(), 1);
        assert_eq!(snapshot.field_mappings[0].id, None);

        let target = test_pool().await;
        tables::save_table_mapping(&target, &TableMapping::new("ct_stale", "stale"))
            .await
            .unwrap();
        let summary = import_all(&target, &snapshot).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                tables: 1,
                field_mappings: 1,
                scripts: 1
            }
        );

        let names: Vec<_> = tables::list_tables(&target, true)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.source_table)
            .collect();
        assert_eq!(names, vec!["ct_fund"]);
        let fields = mappings::get_field_mappings(&target, "ct_fund", "fund(code)").await.unwrap();
        assert_eq!(fields[0].target_paths, "data.code");
    }

    #[tokio::test]
    async fn test_failed_import_rolls_back() {
        let pool = test_pool().await;
        populate(&pool).await;
        let mut snapshot = export_all(&pool).await.unwrap();
        // duplicate source table violates the unique constraint
        snapshot.tables.push(TableMapping::new("ct_fund", "other"));

        assert!(import_all(&pool, &snapshot).await.is_err());
        assert_eq!(tables::list_tables(&pool, true).await.unwrap().len(), 1);
        assert_eq!(mappings::list_all_field_mappings(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let pool = test_pool().await;
        populate(&pool).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        export_to_file(&pool, &path).await.unwrap();

        let other = test_pool().await;
        let summary = import_from_file(&other, &path).await.unwrap();
        assert_eq!(summary.field_mappings, 1);
    }
}
