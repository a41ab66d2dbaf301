//! Repository layer for the mapping-configuration database

pub mod mappings;
pub mod scripts;
pub mod tables;
pub mod transfer;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;

use crate::pipeline::{KeySpec, TableJob};

/// Open (creating if needed) the configuration database and migrate it
pub async fn open(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let pool = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .with_context(|| format!("Failed to open config database {}", path.display()))?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Create the configuration tables if absent
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run config database migrations")?;
    Ok(())
}

/// Build a batch job for a registered table
pub async fn load_job(pool: &SqlitePool, table: &tables::TableMapping) -> Result<TableJob> {
    let spec = KeySpec::parse(&table.target_entity)
        .with_context(|| format!("Table {} has an invalid target", table.source_table))?;
    let mappings = mappings::get_field_mappings(pool, &table.source_table, &table.target_entity).await?;
    let script = scripts::get_table_script(pool, &table.source_table, &table.target_entity).await?;

    let mut job = TableJob::new(&table.source_table, spec, mappings);
    job.priority = table.priority;
    job.script = script;
    Ok(job)
}

/// Jobs for enabled tables, or only the named ones (disabled or not)
pub async fn load_jobs(pool: &SqlitePool, only: &[String]) -> Result<Vec<TableJob>> {
    let tables = tables::list_tables(pool, !only.is_empty()).await?;
    for name in only {
        if !tables.iter().any(|t| &t.source_table == name) {
            anyhow::bail!("Table {} is not registered", name);
        }
    }

    let mut jobs = Vec::new();
    for table in &tables {
        if only.is_empty() || only.contains(&table.source_table) {
            jobs.push(load_job(pool, table).await?);
        }
    }
    Ok(jobs)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
