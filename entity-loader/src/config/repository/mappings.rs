//! Field mappings repository (`field_map`)

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::pipeline::FieldMapping;

const SELECT_COLUMNS: &str =
    "id, table_name, target_entity, source_field, target_paths, rule, enabled, order_idx";

pub(super) fn row_to_mapping(row: &sqlx::sqlite::SqliteRow) -> Result<FieldMapping> {
    Ok(FieldMapping {
        id: Some(row.try_get("id")?),
        source_table: row.try_get("table_name")?,
        target_entity: row.try_get("target_entity")?,
        source_field: row.try_get("source_field")?,
        target_paths: row.try_get("target_paths")?,
        rule: row.try_get("rule")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        order_index: row.try_get("order_idx")?,
    })
}

/// Mappings of one (table, entity) pair in declared order
pub async fn get_field_mappings(
    pool: &SqlitePool,
    table_name: &str,
    target_entity: &str,
) -> Result<Vec<FieldMapping>> {
    let sql = format!(
        "SELECT {} FROM field_map WHERE table_name = ? AND target_entity = ? ORDER BY order_idx, id",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(table_name)
        .bind(target_entity)
        .fetch_all(pool)
        .await
        .context("Failed to get field mappings")?;

    rows.iter().map(row_to_mapping).collect()
}

/// Every mapping, grouped by scope
pub async fn list_all_field_mappings(pool: &SqlitePool) -> Result<Vec<FieldMapping>> {
    let sql = format!(
        "SELECT {} FROM field_map ORDER BY table_name, target_entity, order_idx, id",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .context("Failed to list field mappings")?;

    rows.iter().map(row_to_mapping).collect()
}

/// Insert a mapping or update the one with the same (table, entity, source field)
pub async fn upsert_field_mapping(pool: &SqlitePool, mapping: &FieldMapping) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO field_map
            (table_name, target_entity, source_field, target_paths, rule, enabled, order_idx, last_updated)
        VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(table_name, target_entity, source_field) DO UPDATE SET
            target_paths = excluded.target_paths,
            rule = excluded.rule,
            enabled = excluded.enabled,
            order_idx = excluded.order_idx,
            last_updated = CURRENT_TIMESTAMP
        "#,
    )
    .bind(&mapping.source_table)
    .bind(&mapping.target_entity)
    .bind(&mapping.source_field)
    .bind(&mapping.target_paths)
    .bind(&mapping.rule)
    .bind(mapping.enabled as i64)
    .bind(mapping.order_index)
    .execute(pool)
    .await
    .context("Failed to save field mapping")?;

    Ok(())
}

/// Delete the mapping of one source field
pub async fn delete_field_mapping(
    pool: &SqlitePool,
    table_name: &str,
    target_entity: &str,
    source_field: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM field_map WHERE table_name = ? AND target_entity = ? AND source_field = ?")
        .bind(table_name)
        .bind(target_entity)
        .bind(source_field)
        .execute(pool)
        .await
        .context("Failed to delete field mapping")?;

    Ok(())
}

/// Add a pass-through mapping `col -> data.col` for every column without one
///
/// Returns the number of mappings created. New mappings are ordered after
/// the existing ones, in column order.
pub async fn seed_field_mappings(
    pool: &SqlitePool,
    table_name: &str,
    target_entity: &str,
    columns: &[String],
) -> Result<usize> {
    let existing = get_field_mappings(pool, table_name, target_entity).await?;
    let mut next_order = existing.iter().map(|m| m.order_index).max().map_or(0, |m| m + 1);

    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let mut created = 0;
    for column in columns {
        if existing.iter().any(|m| &m.source_field == column) {
            continue;
        }
        let result = sqlx::query(
            r#"
            INSERT INTO field_map (table_name, target_entity, source_field, target_paths, rule, enabled, order_idx)
            VALUES (?, ?, ?, ?, '', 1, ?)
            ON CONFLICT(table_name, target_entity, source_field) DO NOTHING
            "#,
        )
        .bind(table_name)
        .bind(target_entity)
        .bind(column)
        .bind(format!("data.{}", column))
        .bind(next_order)
        .execute(&mut *tx)
        .await
        .context("Failed to seed field mapping")?;

        if result.rows_affected() > 0 {
            created += 1;
            next_order += 1;
        }
    }
    tx.commit().await.context("Failed to commit transaction")?;

    log::info!("Seeded {} mappings for {} -> {}", created, table_name, target_entity);
    Ok(created)
}
