//! Field mapping definitions and projection output

use serde::{Deserialize, Serialize};

/// A JSON object document (insertion ordered)
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Target name that sets the display name instead of a document field
pub const NAME_TARGET: &str = "name";

/// Target prefix for paths written inside the nested document
pub const DATA_PREFIX: &str = "data.";

/// Attribute consulted when no mapping targets `name`
pub const NAME_FALLBACK_ATTR: &str = "__name__";

/// Attribute that overrides the resolved entity type
pub const TYPE_ATTR: &str = "type";

/// One configured source-field -> target-paths mapping
///
/// Unique per (source_table, target_entity, source_field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Database ID (None if not yet persisted)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub source_table: String,
    #[serde(default)]
    pub target_entity: String,
    pub source_field: String,
    /// Comma separated list, e.g. `name,data.title`
    #[serde(default)]
    pub target_paths: String,
    /// Rule expression; empty means pass-through
    #[serde(default)]
    pub rule: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub order_index: i64,
}

fn default_enabled() -> bool {
    true
}

impl FieldMapping {
    /// Create an enabled pass-through mapping
    pub fn new(source_field: impl Into<String>, target_paths: impl Into<String>) -> Self {
        FieldMapping {
            id: None,
            source_table: String::new(),
            target_entity: String::new(),
            source_field: source_field.into(),
            target_paths: target_paths.into(),
            rule: String::new(),
            enabled: true,
            order_index: 0,
        }
    }

    /// Builder: attach a rule
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = rule.into();
        self
    }

    /// Builder: set the (table, entity) scope
    pub fn scoped(mut self, source_table: impl Into<String>, target_entity: impl Into<String>) -> Self {
        self.source_table = source_table.into();
        self.target_entity = target_entity.into();
        self
    }

    /// Parsed target list, trimmed, empties dropped
    pub fn targets(&self) -> Vec<&str> {
        self.target_paths
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn has_rule(&self) -> bool {
        !self.rule.trim().is_empty()
    }
}

/// Output of projecting one source record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingResult {
    /// The nested document written under the entity's document column
    pub document: Document,
    /// Top-level attributes (meta fields, type override, misc)
    pub attributes: Document,
    pub display_name: String,
    /// Entity type the record is stored under
    pub entity_type: String,
}

impl MappingResult {
    pub fn new(entity_type: impl Into<String>) -> Self {
        MappingResult {
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_split() {
        let m = FieldMapping::new("title", " name , data.title,,data.meta.t ");
        assert_eq!(m.targets(), vec!["name", "data.title", "data.meta.t"]);
    }

    #[test]
    fn test_has_rule() {
        assert!(!FieldMapping::new("a", "data.a").has_rule());
        assert!(!FieldMapping::new("a", "data.a").with_rule("   ").has_rule());
        assert!(FieldMapping::new("a", "data.a").with_rule("concat(a,b)").has_rule());
    }

    #[test]
    fn test_deserialize_defaults() {
        let m: FieldMapping = serde_json::from_str(r#"{"source_field":"id"}"#).unwrap();
        assert!(m.enabled);
        assert!(m.rule.is_empty());
        assert!(m.targets().is_empty());
    }
}
