//! Record projection
//!
//! Applies a table's enabled field mappings, in order, to one source record
//! and then runs the optional post-projection script.

mod assign;

pub use assign::Target;

use super::rules::{CompiledRule, Evaluator, RecordView};
use super::script::{PostScript, ScriptScope};
use super::{FieldMapping, KeySpec, MappingResult, NAME_FALLBACK_ATTR, SourceRecord, TYPE_ATTR, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectorOptions {
    /// Start every document as a copy of all source columns
    pub passthrough_unmapped: bool,
}

/// One enabled mapping with its rule parsed
#[derive(Debug, Clone)]
struct CompiledMapping {
    source_field: String,
    targets: Vec<Target>,
    /// `None` for an empty rule: the source field is copied through
    rule: Option<CompiledRule>,
}

impl CompiledMapping {
    fn compile(mapping: &FieldMapping) -> Self {
        CompiledMapping {
            source_field: mapping.source_field.trim().to_string(),
            targets: mapping.targets().into_iter().map(Target::parse).collect(),
            rule: mapping.has_rule().then(|| CompiledRule::compile(mapping.rule.trim())),
        }
    }
}

/// Projects source records of one (table, entity) pair
#[derive(Debug)]
pub struct Projector {
    table: String,
    spec: KeySpec,
    mappings: Vec<CompiledMapping>,
    script: Option<PostScript>,
    options: ProjectorOptions,
}

impl Projector {
    /// Compile the enabled mappings, ordered by their order index
    pub fn new(table: &str, spec: KeySpec, mappings: &[FieldMapping], options: ProjectorOptions) -> Self {
        let mut enabled: Vec<&FieldMapping> = mappings.iter().filter(|m| m.enabled).collect();
        enabled.sort_by_key(|m| m.order_index);

        Projector {
            table: table.to_string(),
            spec,
            mappings: enabled.into_iter().map(CompiledMapping::compile).collect(),
            script: None,
            options,
        }
    }

    pub fn with_script(mut self, script: Option<PostScript>) -> Self {
        self.script = script;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn spec(&self) -> &KeySpec {
        &self.spec
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Project one record
    ///
    /// Entity lookups memoized by the evaluator's session are forgotten first.
    pub async fn project(&self, record: &SourceRecord, evaluator: &Evaluator<'_>) -> MappingResult {
        evaluator.session.begin_record();

        let mut result = MappingResult::new(self.spec.entity_type.clone());
        if self.options.passthrough_unmapped {
            for (column, value) in record.iter() {
                result.document.insert(column.to_string(), value.to_json());
            }
        }

        for mapping in &self.mappings {
            if mapping.targets.is_empty() {
                continue;
            }
            let values = self.evaluate(mapping, record, &result, evaluator).await;
            for (i, target) in mapping.targets.iter().enumerate() {
                // a shorter fan-out repeats its last value
                let value = &values[i.min(values.len() - 1)];
                target.assign(&mut result, value);
            }
        }

        let entity_type = result
            .attributes
            .get(TYPE_ATTR)
            .map(Value::from_json)
            .filter(|v| !v.is_blank())
            .map(|v| v.to_text())
            .unwrap_or_else(|| self.spec.entity_type.clone());

        if let Some(script) = &self.script {
            let scope = ScriptScope {
                table: &self.table,
                entity: &self.spec.entity_type,
                entity_type: &entity_type,
            };
            script.apply(&mut result.document, &scope);
        }

        if result.display_name.trim().is_empty() {
            let fallback = result
                .attributes
                .remove(NAME_FALLBACK_ATTR)
                .or_else(|| result.document.remove(NAME_FALLBACK_ATTR));
            if let Some(name) = fallback {
                result.display_name = Value::from_json(&name).to_text();
            }
        }
        result.entity_type = entity_type;
        result
    }

    /// Values for a mapping's targets; never empty
    async fn evaluate(
        &self,
        mapping: &CompiledMapping,
        record: &SourceRecord,
        partial: &MappingResult,
        evaluator: &Evaluator<'_>,
    ) -> Vec<Value> {
        let view = RecordView::new(&self.table, record, &partial.attributes, &partial.document);

        let Some(rule) = &mapping.rule else {
            let raw = record
                .get(&mapping.source_field)
                .cloned()
                .or_else(|| view.get(&mapping.source_field))
                .unwrap_or_else(Value::empty);
            return vec![raw];
        };

        let needed = rule.parts.len().min(mapping.targets.len()).max(1);
        let mut values = Vec::with_capacity(needed);
        for part in &rule.parts[..needed] {
            // a declared rule never falls back to the raw source value
            let value = evaluator.eval(part, view).await.unwrap_or_else(|| {
                log::debug!(
                    "{}.{}: rule '{}' did not resolve",
                    self.table,
                    mapping.source_field,
                    rule.source
                );
                Value::empty()
            });
            values.push(value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::{LookupCache, LookupSession};
    use crate::pipeline::dump::{dump_path, extract_records};
    use serde_json::json;

    fn record() -> SourceRecord {
        extract_records(
            "insert into public.ct_fund (id, code, title, ts, kind) \
             values (1, 'F1', 'Alpha', '2024-01-02 03:04:05.000', '1,2');",
        )
        .remove(0)
    }

    async fn project(mappings: Vec<FieldMapping>, options: ProjectorOptions) -> MappingResult {
        project_with(mappings, options, None).await
    }

    async fn project_with(
        mappings: Vec<FieldMapping>,
        options: ProjectorOptions,
        script: Option<PostScript>,
    ) -> MappingResult {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dump_path(dir.path(), "ct_firm"),
            "insert into public.ct_firm (code, name) values ('F1', 'Big Firm');",
        )
        .unwrap();
        let cache = LookupCache::new(dir.path());
        let session = LookupSession::new();
        let evaluator = Evaluator::new(&cache, &session, None);
        let projector =
            Projector::new("ct_fund", KeySpec::simple("fund"), &mappings, options).with_script(script);
        projector.project(&record(), &evaluator).await
    }

    #[tokio::test]
    async fn test_empty_rule_passes_through_to_every_target() {
        let result = project(
            vec![FieldMapping::new("title", "name,data.title,data.meta.title")],
            ProjectorOptions::default(),
        )
        .await;
        assert_eq!(result.display_name, "Alpha");
        assert_eq!(
            serde_json::Value::Object(result.document),
            json!({"title": "Alpha", "meta": {"title": "Alpha"}})
        );
    }

    #[tokio::test]
    async fn test_failed_rule_projects_empty_not_raw() {
        let result = project(
            vec![FieldMapping::new("title", "data.title").with_rule("py: undefined_name + 1")],
            ProjectorOptions::default(),
        )
        .await;
        assert_eq!(result.document["title"], "");
    }

    #[tokio::test]
    async fn test_fan_out_pads_with_last_rule() {
        let result = project(
            vec![FieldMapping::new("ts", "data.day,data.year,data.year2")
                .with_rule("date(%Y-%m-%d, ts) || date(%Y, ts)")],
            ProjectorOptions::default(),
        )
        .await;
        assert_eq!(result.document["day"], "2024-01-02");
        assert_eq!(result.document["year"], "2024");
        assert_eq!(result.document["year2"], "2024");
    }

    #[tokio::test]
    async fn test_order_type_override_and_later_rules_see_earlier() {
        let mut first = FieldMapping::new("code", "data.code");
        first.order_index = 2;
        let mut second = FieldMapping::new("code", "data.code").with_rule("'overwritten'");
        second.order_index = 3;
        let mut typed = FieldMapping::new("kind", "type").with_rule("'fund_share'");
        typed.order_index = 1;
        let mut label = FieldMapping::new("kind", "data.label")
            .with_rule("py:{'1':'x','2':'y'}.get(kind,'?')");
        label.order_index = 4;
        let mut disabled = FieldMapping::new("id", "data.id");
        disabled.enabled = false;
        let mut copy = FieldMapping::new("copy", "data.copy").with_rule("data.code");
        copy.order_index = 5;

        let result = project(
            vec![second, disabled, first, typed, label, copy],
            ProjectorOptions::default(),
        )
        .await;
        assert_eq!(result.entity_type, "fund_share");
        assert_eq!(result.document["code"], "overwritten");
        assert_eq!(result.document["label"], "x,y");
        assert_eq!(result.document["copy"], "overwritten");
        assert!(!result.document.contains_key("id"));
    }

    #[tokio::test]
    async fn test_dump_lookup_and_name_fallback() {
        let result = project(
            vec![
                FieldMapping::new("code", "data.firm")
                    .with_rule("sql.ct_firm(sql.ct_firm.code=code).name"),
                FieldMapping::new("code", "__name__"),
            ],
            ProjectorOptions::default(),
        )
        .await;
        assert_eq!(result.document["firm"], "Big Firm");
        assert_eq!(result.display_name, "F1");
        assert!(!result.attributes.contains_key("__name__"));
        assert_eq!(result.entity_type, "fund");
    }

    #[tokio::test]
    async fn test_passthrough_unmapped_seeds_document() {
        let result = project(vec![], ProjectorOptions { passthrough_unmapped: true }).await;
        assert_eq!(result.document["id"], 1);
        assert_eq!(result.document["code"], "F1");
        assert_eq!(result.document.len(), 5);
    }

    #[tokio::test]
    async fn test_script_runs_after_mappings_and_faults_are_kept() {
        let script = PostScript::lua(
            "t",
            "record.upper = lib.upper(record.code); record.t = entity_type; error('late')",
        )
        .unwrap();
        let result = project_with(
            vec![FieldMapping::new("code", "data.code")],
            ProjectorOptions::default(),
            Some(script),
        )
        .await;
        assert_eq!(result.document["upper"], "F1");
        assert_eq!(result.document["t"], "fund");
        assert_eq!(result.document["code"], "F1");
    }
}
