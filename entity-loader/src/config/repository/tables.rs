//! Source table registrations (`table_map`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// One source table and the entity spec it loads into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub source_table: String,
    /// Target spec, e.g. `fund(code)[tmp]`
    pub target_entity: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub description: String,
}

impl TableMapping {
    pub fn new(source_table: impl Into<String>, target_entity: impl Into<String>) -> Self {
        TableMapping {
            source_table: source_table.into(),
            target_entity: target_entity.into(),
            priority: 0,
            disabled: false,
            description: String::new(),
        }
    }
}

fn row_to_table(row: &sqlx::sqlite::SqliteRow) -> Result<TableMapping> {
    Ok(TableMapping {
        source_table: row.try_get("source_table")?,
        target_entity: row.try_get("target_entity")?,
        priority: row.try_get("priority")?,
        disabled: row.try_get::<i64, _>("disabled")? != 0,
        description: row.try_get("description")?,
    })
}

/// List registered tables, highest priority first
pub async fn list_tables(pool: &SqlitePool, include_disabled: bool) -> Result<Vec<TableMapping>> {
    let rows = sqlx::query(
        r#"
        SELECT source_table, target_entity, priority, disabled, description
        FROM table_map
        WHERE disabled = 0 OR ?
        ORDER BY priority DESC, source_table
        "#,
    )
    .bind(include_disabled)
    .fetch_all(pool)
    .await
    .context("Failed to list tables")?;

    rows.iter().map(row_to_table).collect()
}

/// Get one table registration
pub async fn get_table(pool: &SqlitePool, source_table: &str) -> Result<Option<TableMapping>> {
    let row = sqlx::query(
        "SELECT source_table, target_entity, priority, disabled, description FROM table_map WHERE source_table = ?",
    )
    .bind(source_table)
    .fetch_optional(pool)
    .await
    .context("Failed to get table mapping")?;

    row.as_ref().map(row_to_table).transpose()
}

/// Insert or update a table registration
pub async fn save_table_mapping(pool: &SqlitePool, table: &TableMapping) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO table_map (source_table, target_entity, priority, disabled, description)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(source_table) DO UPDATE SET
            target_entity = excluded.target_entity,
            priority = excluded.priority,
            disabled = excluded.disabled,
            description = excluded.description
        "#,
    )
    .bind(&table.source_table)
    .bind(&table.target_entity)
    .bind(table.priority)
    .bind(table.disabled as i64)
    .bind(&table.description)
    .execute(pool)
    .await
    .context("Failed to save table mapping")?;

    Ok(())
}

/// Soft-delete or restore a table; returns false if it is not registered
pub async fn set_table_disabled(pool: &SqlitePool, source_table: &str, disabled: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE table_map SET disabled = ? WHERE source_table = ?")
        .bind(disabled as i64)
        .bind(source_table)
        .execute(pool)
        .await
        .context("Failed to update table mapping")?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::test_pool;

    #[tokio::test]
    async fn test_list_orders_by_priority_and_hides_disabled() {
        let pool = test_pool().await;
        let mut firm = TableMapping::new("ct_firm", "firm(code)");
        firm.priority = 10;
        save_table_mapping(&pool, &TableMapping::new("ct_fund", "fund")).await.unwrap();
        save_table_mapping(&pool, &firm).await.unwrap();
        save_table_mapping(&pool, &TableMapping::new("ct_old", "old")).await.unwrap();
        assert!(set_table_disabled(&pool, "ct_old", true).await.unwrap());
        assert!(!set_table_disabled(&pool, "ct_missing", true).await.unwrap());

        let names: Vec<_> = list_tables(&pool, false)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.source_table)
            .collect();
        assert_eq!(names, vec!["ct_firm", "ct_fund"]);
        assert_eq!(list_tables(&pool, true).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_save_updates_existing() {
        let pool = test_pool().await;
        save_table_mapping(&pool, &TableMapping::new("ct_fund", "fund")).await.unwrap();
        save_table_mapping(&pool, &TableMapping::new("ct_fund", "fund(code)")).await.unwrap();
        let table = get_table(&pool, "ct_fund").await.unwrap().unwrap();
        assert_eq!(table.target_entity, "fund(code)");
        assert!(get_table(&pool, "nope").await.unwrap().is_none());
    }
}
