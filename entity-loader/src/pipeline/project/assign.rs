//! Target path assignment

use crate::pipeline::{DATA_PREFIX, MappingResult, NAME_TARGET, Value, set_path};

/// Where a mapping target writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The display-name slot
    Name,
    /// A dot path inside the document
    Document(String),
    /// A top-level attribute (meta fields, type override)
    Attribute(String),
}

impl Target {
    pub fn parse(target: &str) -> Self {
        let target = target.trim();
        if target == NAME_TARGET {
            Target::Name
        } else if let Some(path) = target.strip_prefix(DATA_PREFIX) {
            Target::Document(path.to_string())
        } else {
            Target::Attribute(target.to_string())
        }
    }

    /// Write a value; later writes to the same target win
    pub fn assign(&self, result: &mut MappingResult, value: &Value) {
        match self {
            Target::Name => result.display_name = value.to_text(),
            Target::Document(path) => set_path(&mut result.document, path, value.to_json()),
            Target::Attribute(name) => {
                result.attributes.insert(name.clone(), value.to_json());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_targets() {
        assert_eq!(Target::parse("name"), Target::Name);
        assert_eq!(Target::parse(" data.a.b "), Target::Document("a.b".into()));
        assert_eq!(Target::parse("type"), Target::Attribute("type".into()));
    }

    #[test]
    fn test_assign_last_writer_wins() {
        let mut result = MappingResult::new("fund");
        Target::parse("data.code").assign(&mut result, &Value::from("A"));
        Target::parse("data.code").assign(&mut result, &Value::from("B"));
        Target::parse("name").assign(&mut result, &Value::Int(7));
        Target::parse("del").assign(&mut result, &Value::Int(1));
        assert_eq!(serde_json::Value::Object(result.document), json!({"code": "B"}));
        assert_eq!(result.display_name, "7");
        assert_eq!(result.attributes["del"], 1);
    }
}
