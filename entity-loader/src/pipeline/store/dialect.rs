//! Storage-engine specific SQL for the entity table
//!
//! The only engine-dependent piece is extracting a scalar out of the JSON
//! document column; everything else is portable SQL.

use serde::{Deserialize, Serialize};

/// JSON extraction flavour of the backing engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JsonDialect {
    #[default]
    Sqlite,
    Mysql,
}

impl JsonDialect {
    /// JSON path of a dotted document field, e.g. `fund.code` -> `$.fund.code`
    pub fn json_path(&self, field: &str) -> String {
        let mut path = String::from("$");
        for seg in field.split('.').filter(|s| !s.is_empty()) {
            if seg.chars().all(|c| c.is_alphanumeric() || c == '_') {
                path.push('.');
                path.push_str(seg);
            } else {
                path.push_str(&format!(".\"{}\"", seg.replace('"', "\\\"")));
            }
        }
        path
    }

    /// Text value of the document field bound as the next `?` parameter
    pub fn extract_text(&self) -> &'static str {
        match self {
            JsonDialect::Sqlite => "CAST(json_extract(document, ?) AS TEXT)",
            JsonDialect::Mysql => "JSON_UNQUOTE(JSON_EXTRACT(document, ?))",
        }
    }

    /// `type = ? AND <document field ?> = ?`
    pub fn key_predicate(&self) -> String {
        format!("type = ? AND {} = ?", self.extract_text())
    }

    /// Pick the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            JsonDialect::Mysql
        } else {
            JsonDialect::Sqlite
        }
    }

    /// Statements creating the entity table and its indexes
    ///
    /// `external_id` is indexed but not unique; rows are told apart by the
    /// surrogate `id`.
    pub fn schema_statements(&self, table: &str) -> Vec<String> {
        let columns = r#"
                external_id VARCHAR(64) NOT NULL,
                namespace VARCHAR(128) NOT NULL DEFAULT '',
                type VARCHAR(128) NOT NULL,
                name VARCHAR(512) NOT NULL DEFAULT '',
                document TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL"#;
        match self {
            JsonDialect::Sqlite => vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (\n                id INTEGER PRIMARY KEY AUTOINCREMENT,{columns}\n            )"
                ),
                format!("CREATE INDEX IF NOT EXISTS idx_{table}_type ON {table} (type)"),
                format!("CREATE INDEX IF NOT EXISTS idx_{table}_external_id ON {table} (external_id)"),
            ],
            // MySQL has no CREATE INDEX IF NOT EXISTS
            JsonDialect::Mysql => vec![format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n                id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,{columns},\n                INDEX idx_{table}_type (type),\n                INDEX idx_{table}_external_id (external_id)\n            )"
            )],
        }
    }
}

impl std::fmt::Display for JsonDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonDialect::Sqlite => write!(f, "sqlite"),
            JsonDialect::Mysql => write!(f, "mysql"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_path() {
        let d = JsonDialect::Sqlite;
        assert_eq!(d.json_path("code"), "$.code");
        assert_eq!(d.json_path("fund.code"), "$.fund.code");
        assert_eq!(d.json_path("fund code"), "$.\"fund code\"");
    }

    #[test]
    fn test_from_url() {
        assert_eq!(JsonDialect::from_url("sqlite://entities.db"), JsonDialect::Sqlite);
        assert_eq!(JsonDialect::from_url("sqlite::memory:"), JsonDialect::Sqlite);
        assert_eq!(JsonDialect::from_url("mysql://u:p@host/db"), JsonDialect::Mysql);
    }

    #[test]
    fn test_schema_statements() {
        let sqlite = JsonDialect::Sqlite.schema_statements("entity");
        assert_eq!(sqlite.len(), 3);
        assert!(sqlite[0].contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(!sqlite[0].contains("external_id VARCHAR(64) NOT NULL PRIMARY KEY"));

        let mysql = JsonDialect::Mysql.schema_statements("entity");
        assert_eq!(mysql.len(), 1);
        assert!(mysql[0].contains("AUTO_INCREMENT PRIMARY KEY"));
        assert!(mysql[0].contains("INDEX idx_entity_type (type)"));
        assert!(mysql[0].contains("INDEX idx_entity_external_id (external_id)"));
    }

    #[test]
    fn test_key_predicate_per_engine() {
        assert_eq!(
            JsonDialect::Sqlite.key_predicate(),
            "type = ? AND CAST(json_extract(document, ?) AS TEXT) = ?"
        );
        assert_eq!(
            JsonDialect::Mysql.key_predicate(),
            "type = ? AND JSON_UNQUOTE(JSON_EXTRACT(document, ?)) = ?"
        );
    }
}
