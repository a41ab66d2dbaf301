//! Command handlers

pub mod mappings;
pub mod purge;
pub mod run;
pub mod tables;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use super::{Cli, Commands};
use crate::config::{AppConfig, repository};
use crate::pipeline::{LookupCache, SqlEntityStore};

/// Dispatch a parsed command line
pub async fn handle(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { tables, mode, workers } => run::handle_run(&config, &tables, mode, workers).await,
        Commands::Preview { table, index } => run::handle_preview(&config, &table, index).await,
        Commands::Warm { tables } => run::handle_warm(&config, &tables).await,
        Commands::Tables { command } => tables::handle_tables_command(&config, command).await,
        Commands::Mappings { command } => mappings::handle_mappings_command(&config, command).await,
        Commands::Purge { entity_type, mode, yes } => purge::handle_purge(&config, &entity_type, mode, yes).await,
    }
}

pub(crate) async fn open_config_db(config: &AppConfig) -> Result<SqlitePool> {
    repository::open(&config.config_db).await
}

/// Connecting is the one fatal step of a batch
pub(crate) async fn connect_store(config: &AppConfig) -> Result<Arc<SqlEntityStore>> {
    let store = SqlEntityStore::connect_as(&config.store_url, config.dialect(), &config.namespace)
        .await
        .context("Entity store unavailable")?;
    Ok(Arc::new(store))
}

pub(crate) fn lookup_cache(config: &AppConfig) -> Arc<LookupCache> {
    Arc::new(LookupCache::new(&config.dump_dir))
}
