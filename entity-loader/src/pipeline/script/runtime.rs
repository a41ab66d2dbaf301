//! Lua runtime for post-projection scripts
//!
//! Provides a sandboxed Lua environment: no io, os, debug or package
//! libraries, and a memory cap.

use anyhow::{Context, Result};
use mlua::{Function, Lua, StdLib, Table, Value};
use std::sync::{Arc, Mutex};

use super::stdlib::{LogMessage, StdlibContext, register_stdlib};
use super::{ScriptFault, ScriptScope};
use crate::pipeline::Document;

const MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// A sandboxed Lua runtime
pub struct ScriptRuntime {
    lua: Lua,
    context: Arc<Mutex<StdlibContext>>,
}

impl ScriptRuntime {
    pub fn new() -> Result<Self> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            mlua::LuaOptions::default(),
        )
        .context("Failed to create Lua runtime")?;

        lua.set_memory_limit(MEMORY_LIMIT)?;

        // the base library can still read files
        for name in ["dofile", "loadfile"] {
            lua.globals()
                .set(name, Value::Nil)
                .context("Failed to restrict Lua globals")?;
        }

        let context = Arc::new(Mutex::new(StdlibContext::default()));
        register_stdlib(&lua, context.clone()).context("Failed to register stdlib")?;

        Ok(ScriptRuntime { lua, context })
    }

    /// JSON to Lua; `null` becomes the `NULL` sentinel so keys survive the trip
    pub fn json_to_lua(&self, value: &serde_json::Value) -> Result<Value> {
        use serde_json::Value as Json;
        let converted = match value {
            Json::Null => Value::NULL,
            Json::Bool(b) => Value::Boolean(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map_or(Value::NULL, Value::Number),
            },
            Json::String(s) => Value::String(self.lua.create_string(s)?),
            Json::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.json_to_lua(item))
                    .collect::<Result<Vec<_>>>()?;
                Value::Table(self.lua.create_sequence_from(items)?)
            }
            Json::Object(obj) => Value::Table(self.document_to_lua(obj)?),
        };
        Ok(converted)
    }

    pub fn document_to_lua(&self, doc: &Document) -> Result<Table> {
        let table = self.lua.create_table_with_capacity(0, doc.len())?;
        for (key, val) in doc {
            table.raw_set(key.as_str(), self.json_to_lua(val)?)?;
        }
        Ok(table)
    }

    /// Lua to JSON; functions, threads and userdata become `null`
    pub fn lua_to_json(&self, value: Value) -> Result<serde_json::Value> {
        use serde_json::Value as Json;
        Ok(match value {
            Value::Boolean(b) => Json::Bool(b),
            Value::Integer(i) => Json::from(i),
            Value::Number(n) => serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.to_str()?.to_string()),
            // a non-empty border means the script built a list
            Value::Table(t) if t.raw_len() > 0 => Json::Array(
                t.sequence_values::<Value>()
                    .map(|v| self.lua_to_json(v?))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Table(t) => Json::Object(self.lua_to_document(t)?),
            _ => Json::Null,
        })
    }

    /// Table to document; non-string keys other than integers are dropped
    pub fn lua_to_document(&self, table: Table) -> Result<Document> {
        let mut doc = Document::new();
        for pair in table.pairs::<Value, Value>() {
            let (k, v) = pair?;
            let key = match k {
                Value::String(s) => s.to_str()?.to_string(),
                Value::Integer(i) => i.to_string(),
                _ => continue,
            };
            doc.insert(key, self.lua_to_json(v)?);
        }
        Ok(doc)
    }

    /// Compile a chunk once for repeated runs
    pub fn compile(&self, name: &str, source: &str) -> Result<Function> {
        self.lua
            .load(source)
            .set_name(name)
            .into_function()
            .with_context(|| format!("Failed to compile script {}", name))
    }

    /// Run a compiled chunk against a document
    ///
    /// The document is written back even when the chunk raises, so edits made
    /// before the fault are kept.
    pub fn run(&self, chunk: &Function, doc: &mut Document, scope: &ScriptScope<'_>) -> Result<(), ScriptFault> {
        let fault = |message: String| ScriptFault {
            table: scope.table.to_string(),
            entity: scope.entity.to_string(),
            message,
        };

        let record = self.document_to_lua(doc).map_err(|e| fault(e.to_string()))?;
        let env = self
            .record_env(record.clone(), scope)
            .and_then(|env| chunk.set_environment(env.clone()).map(|_| env))
            .map_err(|e| fault(e.to_string()))?;

        let outcome = chunk.call::<()>(());

        // the script may have rebound `record` to a fresh table
        let table = match env.raw_get::<Value>("record") {
            Ok(Value::Table(t)) => t,
            _ => record,
        };
        match self.lua_to_document(table) {
            Ok(updated) => *doc = updated,
            Err(e) => log::debug!("Could not read back script document: {}", e),
        }

        self.flush_logs(scope);
        outcome.map_err(|e| fault(e.to_string()))
    }

    /// Fresh global scope for one record
    ///
    /// Reads fall back to the sandbox globals; assignments stay in the
    /// returned table and are dropped with it.
    fn record_env(&self, record: Table, scope: &ScriptScope<'_>) -> mlua::Result<Table> {
        let env = self.lua.create_table()?;
        env.raw_set("record", record)?;
        env.raw_set("entity", scope.entity)?;
        env.raw_set("entity_type", scope.entity_type)?;
        env.raw_set("_G", env.clone())?;

        let meta = self.lua.create_table()?;
        meta.raw_set("__index", self.lua.globals())?;
        let set_metatable: Function = self.lua.globals().get("setmetatable")?;
        set_metatable.call::<Table>((env.clone(), meta))
    }

    /// Forward lib.log/lib.warn output to the log facade
    fn flush_logs(&self, scope: &ScriptScope<'_>) {
        let logs = match self.context.lock() {
            Ok(mut ctx) => std::mem::take(&mut ctx.logs),
            Err(poisoned) => std::mem::take(&mut poisoned.into_inner().logs),
        };
        for message in logs {
            match message {
                LogMessage::Info(msg) => log::info!("[script {}/{}] {}", scope.table, scope.entity, msg),
                LogMessage::Warn(msg) => log::warn!("[script {}/{}] {}", scope.table, scope.entity, msg),
            }
        }
    }

    /// The underlying Lua state, for tests and ad-hoc evaluation
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}
