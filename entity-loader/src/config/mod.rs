//! Application configuration
//!
//! Loaded from TOML (`--config`, else `<config dir>/entity-loader/config.toml`,
//! else defaults), then overridden by `ENTITY_LOADER_*` environment variables.

pub mod repository;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::batch::BatchOptions;
use crate::pipeline::store::JsonDialect;
use crate::pipeline::{ProjectorOptions, WriteMode};

pub const APP_DIR: &str = "entity-loader";
pub const CONFIG_FILE: &str = "config.toml";

pub const ENV_STORE_URL: &str = "ENTITY_LOADER_STORE_URL";
pub const ENV_CONFIG_DB: &str = "ENTITY_LOADER_CONFIG_DB";
pub const ENV_DUMP_DIR: &str = "ENTITY_LOADER_DUMP_DIR";
pub const ENV_NAMESPACE: &str = "ENTITY_LOADER_NAMESPACE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// sqlx URL (or SQLite file path) of the entity document store
    pub store_url: String,
    /// SQLite file holding table and field mappings
    pub config_db: PathBuf,
    /// Directory of `<table>.sql` dumps
    pub dump_dir: PathBuf,
    /// Namespace column value for new entity rows
    pub namespace: String,
    /// Tables loaded concurrently
    pub workers: usize,
    pub write_mode: WriteMode,
    /// Records between progress updates
    pub progress_every: usize,
    /// JSON extraction flavour; inferred from `store_url` when unset
    pub json_dialect: Option<JsonDialect>,
    /// Seed documents with every source column
    pub passthrough_unmapped: bool,
}

/// `<config dir>/entity-loader`, or the working directory if unknown
pub fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            store_url: format!("sqlite://{}?mode=rwc", app_dir().join("entities.db").display()),
            config_db: app_dir().join("mappings.db"),
            dump_dir: PathBuf::from("dumps"),
            namespace: "default".to_string(),
            workers: 4,
            write_mode: WriteMode::Upsert,
            progress_every: 200,
            json_dialect: None,
            passthrough_unmapped: false,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        app_dir().join(CONFIG_FILE)
    }

    /// Load from an explicit file (which must exist) or the default location
    /// (which may not), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    log::debug!("No config at {}, using defaults", default.display());
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML")
    }

    /// Apply `ENTITY_LOADER_*` overrides from a variable source
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_STORE_URL) {
            self.store_url = url;
        }
        if let Some(db) = get(ENV_CONFIG_DB) {
            self.config_db = PathBuf::from(db);
        }
        if let Some(dir) = get(ENV_DUMP_DIR) {
            self.dump_dir = PathBuf::from(dir);
        }
        if let Some(ns) = get(ENV_NAMESPACE) {
            self.namespace = ns;
        }
    }

    pub fn dialect(&self) -> JsonDialect {
        self.json_dialect
            .unwrap_or_else(|| JsonDialect::from_url(&self.store_url))
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            workers: self.workers.max(1),
            write_mode: self.write_mode,
            progress_every: self.progress_every.max(1),
            projector: ProjectorOptions {
                passthrough_unmapped: self.passthrough_unmapped,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            dump_dir = "/data/dumps"
            write_mode = "create_only"
            workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.dump_dir, PathBuf::from("/data/dumps"));
        assert_eq!(config.write_mode, WriteMode::CreateOnly);
        assert_eq!(config.workers, 8);
        assert_eq!(config.progress_every, 200);
        assert_eq!(config.namespace, "default");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(AppConfig::from_toml("write_mode = \"sometimes\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_STORE_URL, "mysql://u:p@db/entities"),
            (ENV_NAMESPACE, "tenant-a"),
            (ENV_DUMP_DIR, "  "),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.store_url, "mysql://u:p@db/entities");
        assert_eq!(config.namespace, "tenant-a");
        assert_eq!(config.dump_dir, PathBuf::from("dumps"));
        assert_eq!(config.dialect(), JsonDialect::Mysql);
    }

    #[test]
    fn test_explicit_dialect_and_batch_options() {
        let config = AppConfig::from_toml(
            "store_url = \"sqlite::memory:\"\njson_dialect = \"mysql\"\nworkers = 0\npassthrough_unmapped = true",
        )
        .unwrap();
        assert_eq!(config.dialect(), JsonDialect::Mysql);
        let options = config.batch_options();
        assert_eq!(options.workers, 1);
        assert!(options.projector.passthrough_unmapped);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "namespace = \"from-file\"").unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.namespace, "from-file");
        assert!(AppConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
