//! Command-line interface

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::{DeleteMode, WriteMode};

#[derive(Debug, Parser)]
#[command(name = "entity-loader", version, about = "Load bulk-insert SQL dumps into an entity document store")]
pub struct Cli {
    /// Config file (default: <config dir>/entity-loader/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Project and upsert registered tables
    Run {
        /// Tables to run (default: every enabled table)
        tables: Vec<String>,
        /// Override the configured write mode
        #[arg(long, value_enum)]
        mode: Option<WriteMode>,
        /// Override the configured worker count
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Show the entity row one dump record would produce
    Preview {
        table: String,
        /// Zero-based record index
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Manage table registrations
    Tables {
        #[command(subcommand)]
        command: TableCommands,
    },
    /// Manage field mappings
    Mappings {
        #[command(subcommand)]
        command: MappingCommands,
    },
    /// Flag or delete every entity of a type
    Purge {
        entity_type: String,
        #[arg(long, value_enum, default_value = "logical")]
        mode: DeleteMode,
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Parse dumps ahead of a run and report their record counts
    Warm {
        /// Tables to parse (default: every enabled table)
        tables: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TableCommands {
    /// List registered tables
    List {
        #[arg(long)]
        all: bool,
    },
    /// Register or update a table
    Add {
        table: String,
        /// Target spec: `type`, `type(key)` or `type(key)[excluded,...]`
        target: String,
        #[arg(long, default_value_t = 0)]
        priority: i64,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Soft-delete a table
    Disable { table: String },
    /// Restore a soft-deleted table
    Enable { table: String },
}

#[derive(Debug, Subcommand)]
pub enum MappingCommands {
    /// Show a table's mappings in order
    List { table: String },
    /// Add or update one mapping
    Set {
        table: String,
        source_field: String,
        /// Comma separated targets: `name`, `data.<path>` or an attribute
        target_paths: String,
        #[arg(long, default_value = "")]
        rule: String,
        #[arg(long, default_value_t = 0)]
        order: i64,
        #[arg(long)]
        disabled: bool,
    },
    /// Add pass-through mappings for dump columns that have none
    Seed { table: String },
    /// Save every table, mapping and script to a JSON file
    Export { file: PathBuf },
    /// Replace the whole configuration from a JSON file
    Import { file: PathBuf },
    /// Set the post-projection Lua script from a file
    Script { table: String, file: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["entity-loader", "-v", "run", "ct_fund", "--mode", "create-only"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { tables, mode, workers } => {
                assert_eq!(tables, vec!["ct_fund"]);
                assert_eq!(mode, Some(WriteMode::CreateOnly));
                assert_eq!(workers, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_purge_defaults_logical() {
        let cli = Cli::parse_from(["entity-loader", "purge", "fund"]);
        match cli.command {
            Commands::Purge { entity_type, mode, yes } => {
                assert_eq!(entity_type, "fund");
                assert_eq!(mode, DeleteMode::Logical);
                assert!(!yes);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
