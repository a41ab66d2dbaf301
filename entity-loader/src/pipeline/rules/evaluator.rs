//! Rule evaluation against one record
//!
//! `None` means the rule could not resolve (lookup miss, script error, bad
//! syntax). That is distinct from `Some("")`: callers decide what a miss
//! projects to.

use futures::FutureExt;
use futures::future::BoxFuture;

use super::expr::{Atom, CodeTable, DumpRef, EntityRef, KeySource, RuleExpr};
use super::matchers::parse_rule;
use super::pyexpr::{NameResolver, PyExpr, PyValue, eval as eval_py};
use super::scope::RecordView;
use super::date::format_date;
use crate::pipeline::Value;
use crate::pipeline::cache::{EntitySource, LookupCache, LookupSession};

/// Evaluates rules with access to the run's lookup caches
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    pub cache: &'a LookupCache,
    pub session: &'a LookupSession,
    pub entities: Option<&'a dyn EntitySource>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        cache: &'a LookupCache,
        session: &'a LookupSession,
        entities: Option<&'a dyn EntitySource>,
    ) -> Self {
        Evaluator {
            cache,
            session,
            entities,
        }
    }

    /// Parse and evaluate a single rule string
    pub async fn eval_rule(&self, rule: &str, view: RecordView<'_>) -> Option<Value> {
        let expr = parse_rule(rule);
        self.eval(&expr, view).await
    }

    pub fn eval<'b>(&'b self, expr: &'b RuleExpr, view: RecordView<'b>) -> BoxFuture<'b, Option<Value>> {
        async move {
            match expr {
                RuleExpr::Date { format, source } => {
                    let value = self.eval(source, view).await.unwrap_or(Value::Null);
                    Some(Value::String(format_date(format, &value)))
                }

                RuleExpr::Coalesce(items) => {
                    for item in items {
                        if let Some(v) = self.eval(item, view).await {
                            if !v.is_blank() {
                                return Some(v);
                            }
                        }
                    }
                    Some(Value::empty())
                }

                RuleExpr::Concat(items) => {
                    let mut out = String::new();
                    for item in items {
                        if let Some(v) = self.eval(item, view).await {
                            out.push_str(&v.to_text());
                        }
                    }
                    Some(Value::String(out))
                }

                RuleExpr::Entity(entity) => self.eval_entity(entity, view).await,
                RuleExpr::Dump(dump) => self.eval_dump(dump, view).await,
                RuleExpr::CodeTable(table) => eval_code_table(table, &view),

                RuleExpr::Py(py) => match eval_py(py, &view) {
                    Ok(v) => v.into_value(),
                    Err(e) => {
                        log::debug!("py: expression failed on {}: {}", view.table, e);
                        None
                    }
                },

                RuleExpr::Atom(atom) => Some(eval_atom(atom, &view)),
                RuleExpr::Unresolvable(_) => None,
            }
        }
        .boxed()
    }

    async fn key_value(&self, source: &KeySource, view: RecordView<'_>) -> Option<Value> {
        let value = match source {
            KeySource::Fields(names) => names
                .iter()
                .filter_map(|n| view.get(n))
                .find(|v| !v.is_blank()),
            KeySource::Expr(expr) => self.eval(expr, view).await,
        };
        value.filter(|v| !v.is_blank())
    }

    async fn eval_entity(&self, entity: &EntityRef, view: RecordView<'_>) -> Option<Value> {
        let key = self.key_value(&entity.source, view).await?.to_text();
        let key = key.trim();

        if let Some(hit) = self
            .session
            .get(&entity.entity_type, &entity.key_field, key, &entity.target)
        {
            return hit;
        }

        let Some(entities) = self.entities else {
            log::debug!(
                "No entity store attached; {}({}={}) unresolved",
                entity.entity_type,
                entity.key_field,
                key
            );
            return None;
        };

        match entities
            .fetch_field(&entity.entity_type, &entity.key_field, key, &entity.target)
            .await
        {
            Ok(found) => {
                let found = found.filter(|v| !v.is_blank());
                if found.is_none() {
                    log::debug!(
                        "Lookup miss: {}.{} = '{}' -> {:?}",
                        entity.entity_type,
                        entity.key_field,
                        key,
                        entity.target
                    );
                }
                self.session.put(
                    &entity.entity_type,
                    &entity.key_field,
                    key,
                    &entity.target,
                    found.clone(),
                );
                found
            }
            Err(e) => {
                log::warn!(
                    "Entity lookup {}.{} = '{}' failed: {:#}",
                    entity.entity_type,
                    entity.key_field,
                    key,
                    e
                );
                None
            }
        }
    }

    async fn eval_dump(&self, dump: &DumpRef, view: RecordView<'_>) -> Option<Value> {
        let key = self.eval(&dump.source, view).await?;
        match self
            .cache
            .lookup(&dump.table, &dump.key_field, &key, &dump.target_field)
        {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Dump lookup on {} failed: {:#}", dump.table, e);
                None
            }
        }
    }
}

fn eval_atom(atom: &Atom, view: &RecordView<'_>) -> Value {
    match atom {
        Atom::Literal(text) => Value::String(text.clone()),
        Atom::Field(field) => view.get(field).unwrap_or_else(Value::empty),
        Atom::Ref(name) => view.get(name).unwrap_or_else(|| Value::String(name.clone())),
    }
}

/// Look up each comma separated key in a literal mapping
fn eval_code_table(table: &CodeTable, view: &RecordView<'_>) -> Option<Value> {
    let scope: &dyn NameResolver = view;
    let mut entries = Vec::with_capacity(table.entries.len());
    for (k, v) in &table.entries {
        let key = eval_py(k, scope).ok()?;
        let value = eval_py(v, scope).ok()?;
        entries.push((key.to_str(), value));
    }

    let key = match eval_py(&table.key, scope) {
        Ok(k) => k,
        // an unknown bare name is looked up as its own text
        Err(_) => match &table.key {
            PyExpr::Name(n) => PyValue::Str(n.clone()),
            _ => return None,
        },
    };
    let default = match &table.default {
        Some(d) => eval_py(d, scope).ok()?,
        None => PyValue::Str(String::new()),
    };

    let lookup = |k: &str| -> PyValue {
        entries
            .iter()
            .find(|(ek, _)| ek == k)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| default.clone())
    };

    match &key {
        PyValue::Str(s) if s.contains(',') => {
            let joined = s
                .split(',')
                .map(|part| lookup(part.trim()))
                .filter(PyValue::truthy)
                .map(|v| v.to_str())
                .collect::<Vec<_>>()
                .join(",");
            Some(Value::String(joined))
        }
        other => lookup(&other.to_str()).into_value(),
    }
}
