//! Post-projection scripts (`table_scripts`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableScript {
    pub source_table: String,
    pub target_entity: String,
    pub script: String,
}

/// Script for a (table, entity) pair; blank scripts count as none
pub async fn get_table_script(pool: &SqlitePool, source_table: &str, target_entity: &str) -> Result<Option<String>> {
    let script: Option<(String,)> =
        sqlx::query_as("SELECT script FROM table_scripts WHERE source_table = ? AND target_entity = ?")
            .bind(source_table)
            .bind(target_entity)
            .fetch_optional(pool)
            .await
            .context("Failed to get table script")?;

    Ok(script.map(|(s,)| s).filter(|s| !s.trim().is_empty()))
}

pub async fn list_table_scripts(pool: &SqlitePool) -> Result<Vec<TableScript>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT source_table, target_entity, script FROM table_scripts ORDER BY source_table, target_entity",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list table scripts")?;

    Ok(rows
        .into_iter()
        .map(|(source_table, target_entity, script)| TableScript {
            source_table,
            target_entity,
            script,
        })
        .collect())
}

/// Insert or replace the script of a (table, entity) pair
pub async fn save_table_script(pool: &SqlitePool, source_table: &str, target_entity: &str, script: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO table_scripts (source_table, target_entity, script)
        VALUES (?, ?, ?)
        ON CONFLICT(source_table, target_entity) DO UPDATE SET script = excluded.script
        "#,
    )
    .bind(source_table)
    .bind(target_entity)
    .bind(script)
    .execute(pool)
    .await
    .context("Failed to save table script")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::test_pool;

    #[tokio::test]
    async fn test_save_and_get_script() {
        let pool = test_pool().await;
        assert!(get_table_script(&pool, "ct_fund", "fund").await.unwrap().is_none());

        save_table_script(&pool, "ct_fund", "fund", "record.a = 1").await.unwrap();
        save_table_script(&pool, "ct_fund", "fund", "record.a = 2").await.unwrap();
        assert_eq!(
            get_table_script(&pool, "ct_fund", "fund").await.unwrap().as_deref(),
            Some("record.a = 2")
        );

        save_table_script(&pool, "ct_firm", "firm", "   ").await.unwrap();
        assert!(get_table_script(&pool, "ct_firm", "firm").await.unwrap().is_none());
        assert_eq!(list_table_scripts(&pool).await.unwrap().len(), 2);
    }
}
