//! `mappings` subcommands

use anyhow::{Context, Result};
use colored::*;
use sqlx::SqlitePool;

use super::open_config_db;
use crate::cli::MappingCommands;
use crate::config::AppConfig;
use crate::config::repository::tables::{self, TableMapping};
use crate::config::repository::{mappings, scripts, transfer};
use crate::pipeline::FieldMapping;
use crate::pipeline::dump::{discover_columns, dump_path};
use crate::pipeline::script::PostScript;

pub async fn handle_mappings_command(config: &AppConfig, command: MappingCommands) -> Result<()> {
    let pool = open_config_db(config).await?;

    match command {
        MappingCommands::List { table } => {
            let registered = registered_table(&pool, &table).await?;
            let list = mappings::get_field_mappings(&pool, &table, &registered.target_entity).await?;
            for m in list {
                let source = if m.enabled {
                    m.source_field.normal()
                } else {
                    m.source_field.dimmed()
                };
                println!(
                    "{:>4}  {:<24} -> {:<32} {}",
                    m.order_index,
                    source,
                    m.target_paths.cyan(),
                    m.rule.yellow()
                );
            }
        }
        MappingCommands::Set {
            table,
            source_field,
            target_paths,
            rule,
            order,
            disabled,
        } => {
            let registered = registered_table(&pool, &table).await?;
            let mut mapping = FieldMapping::new(source_field, target_paths)
                .with_rule(rule)
                .scoped(&table, &registered.target_entity);
            mapping.order_index = order;
            mapping.enabled = !disabled;
            mappings::upsert_field_mapping(&pool, &mapping).await?;
            println!("Saved {}.{}", table, mapping.source_field.bright_green());
        }
        MappingCommands::Seed { table } => {
            let registered = registered_table(&pool, &table).await?;
            let path = dump_path(&config.dump_dir, &table);
            let columns = discover_columns(&path)?;
            if columns.is_empty() {
                anyhow::bail!("No insert statements found in {}", path.display());
            }
            let created =
                mappings::seed_field_mappings(&pool, &table, &registered.target_entity, &columns).await?;
            println!(
                "Seeded {} of {} columns for {}",
                created.to_string().bright_green(),
                columns.len(),
                table
            );
        }
        MappingCommands::Export { file } => {
            let snapshot = transfer::export_to_file(&pool, &file).await?;
            println!(
                "Exported {} tables, {} mappings, {} scripts to {}",
                snapshot.tables.len(),
                snapshot.field_mappings.len(),
                snapshot.scripts.len(),
                file.display().to_string().bright_green()
            );
        }
        MappingCommands::Import { file } => {
            let summary = transfer::import_from_file(&pool, &file).await?;
            println!(
                "Imported {} tables, {} mappings, {} scripts",
                summary.tables.to_string().bright_green(),
                summary.field_mappings,
                summary.scripts
            );
        }
        MappingCommands::Script { table, file } => {
            let registered = registered_table(&pool, &table).await?;
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read script {}", file.display()))?;
            // compile check only
            PostScript::lua(&table, &source)?;
            scripts::save_table_script(&pool, &table, &registered.target_entity, &source).await?;
            println!("Saved script for {}", table.bright_green());
        }
    }
    Ok(())
}

async fn registered_table(pool: &SqlitePool, table: &str) -> Result<TableMapping> {
    tables::get_table(pool, table)
        .await?
        .with_context(|| format!("Table {} is not registered (use `tables add`)", table))
}
