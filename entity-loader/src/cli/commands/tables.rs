//! `tables` subcommands

use anyhow::{Context, Result};
use colored::*;

use super::open_config_db;
use crate::cli::TableCommands;
use crate::config::AppConfig;
use crate::config::repository::tables::{self, TableMapping};
use crate::pipeline::KeySpec;

pub async fn handle_tables_command(config: &AppConfig, command: TableCommands) -> Result<()> {
    let pool = open_config_db(config).await?;

    match command {
        TableCommands::List { all } => {
            let tables = tables::list_tables(&pool, all).await?;
            if tables.is_empty() {
                println!("{}", "No tables registered".yellow());
            }
            for t in tables {
                let status = if t.disabled { "disabled".red() } else { "".normal() };
                println!(
                    "{:<32} {:<40} {:>4} {} {}",
                    t.source_table,
                    t.target_entity.cyan(),
                    t.priority,
                    status,
                    t.description.dimmed()
                );
            }
        }
        TableCommands::Add {
            table,
            target,
            priority,
            description,
        } => {
            // validated here, parsed again per run
            KeySpec::parse(&target).context("Invalid target")?;
            let mapping = TableMapping {
                source_table: table.clone(),
                target_entity: target,
                priority,
                disabled: false,
                description,
            };
            tables::save_table_mapping(&pool, &mapping).await?;
            println!("Registered {}", table.bright_green());
        }
        TableCommands::Disable { table } => set_disabled(&pool, &table, true).await?,
        TableCommands::Enable { table } => set_disabled(&pool, &table, false).await?,
    }
    Ok(())
}

async fn set_disabled(pool: &sqlx::SqlitePool, table: &str, disabled: bool) -> Result<()> {
    if !tables::set_table_disabled(pool, table, disabled).await? {
        anyhow::bail!("Table {} is not registered", table);
    }
    let state = if disabled { "disabled" } else { "enabled" };
    println!("{} {}", table.bright_green(), state);
    Ok(())
}
