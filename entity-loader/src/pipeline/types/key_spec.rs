//! Business key specification for entity targets
//!
//! Grammar: `<type>`, `<type>(<keyField>)` or `<type>(<keyField>)[<path>,...]`.
//! The key field defaults to `id`. Bracketed paths are stripped from the
//! outgoing document before it is written.

use serde::{Deserialize, Serialize};

pub const DEFAULT_KEY_FIELD: &str = "id";

/// Parsed `<type>(<key>)[<excluded>,...]` target specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub entity_type: String,
    /// Document path of the business key (without `data.` prefix)
    pub key_field: String,
    /// Paths removed before write, as configured. A bare `name` suppresses
    /// the display name; anything else is a document path.
    pub excluded: Vec<String>,
}

/// Error parsing a key specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpecError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for KeySpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid target spec '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for KeySpecError {}

impl KeySpec {
    /// Spec for a bare type keyed by `id`
    pub fn simple(entity_type: impl Into<String>) -> Self {
        KeySpec {
            entity_type: entity_type.into(),
            key_field: DEFAULT_KEY_FIELD.to_string(),
            excluded: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, KeySpecError> {
        let err = |message: &str| KeySpecError {
            input: input.to_string(),
            message: message.to_string(),
        };

        let s = input.trim();
        let type_end = s.find(['(', '[']).unwrap_or(s.len());
        let entity_type = s[..type_end].trim();
        if entity_type.is_empty() {
            return Err(err("missing entity type"));
        }
        if !entity_type
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(err("entity type contains invalid characters"));
        }

        let mut rest = s[type_end..].trim_start();
        let mut key_field = DEFAULT_KEY_FIELD.to_string();

        if let Some(after) = rest.strip_prefix('(') {
            let close = after.find(')').ok_or_else(|| err("unclosed '('"))?;
            let key = strip_data_prefix(after[..close].trim());
            if !key.is_empty() {
                key_field = key.to_string();
            }
            rest = after[close + 1..].trim_start();
        }

        let mut excluded = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or_else(|| err("unclosed '['"))?;
            excluded = after[..close]
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            rest = after[close + 1..].trim_start();
        }

        if !rest.is_empty() {
            return Err(err("unexpected trailing text"));
        }

        Ok(KeySpec {
            entity_type: entity_type.to_string(),
            key_field,
            excluded,
        })
    }

    /// Whether the display name must not be written
    pub fn suppresses_name(&self) -> bool {
        self.excluded.iter().any(|p| p == "name")
    }

    /// Excluded document paths (without `data.` prefix), never including
    /// the key field itself
    pub fn excluded_paths(&self) -> impl Iterator<Item = &str> {
        self.excluded
            .iter()
            .filter(|p| p.as_str() != "name")
            .map(|p| strip_data_prefix(p))
            .filter(move |p| *p != self.key_field)
    }
}

impl std::fmt::Display for KeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.entity_type, self.key_field)?;
        if !self.excluded.is_empty() {
            write!(f, "[{}]", self.excluded.join(","))?;
        }
        Ok(())
    }
}

/// Drop a leading `data.` from a document path
pub fn strip_data_prefix(path: &str) -> &str {
    path.strip_prefix("data.").unwrap_or(path)
}
