//! Post-projection scripts
//!
//! A script runs once per record after all field mappings, with the document
//! bound as `record`. Scripts are best effort: a fault is logged and the
//! record keeps whatever the script had done up to that point.

mod runtime;
mod stdlib;

pub use runtime::ScriptRuntime;
pub use stdlib::{LogMessage, StdlibContext, register_stdlib};

use anyhow::Result;
use mlua::Function;
use std::collections::HashMap;
use std::sync::Arc;

use super::Document;

/// Read-only context handed to a script
#[derive(Debug, Clone, Copy)]
pub struct ScriptScope<'a> {
    pub table: &'a str,
    pub entity: &'a str,
    pub entity_type: &'a str,
}

/// A script raised or could not be set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFault {
    pub table: String,
    pub entity: String,
    pub message: String,
}

impl std::fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "script for {}/{} failed: {}", self.table, self.entity, self.message)
    }
}

impl std::error::Error for ScriptFault {}

/// Host callback registered in place of a Lua script
pub type NativeScript = Arc<dyn Fn(&mut Document, &ScriptScope<'_>) -> Result<()> + Send + Sync>;

/// A compiled post-projection hook
pub enum PostScript {
    Lua { runtime: ScriptRuntime, chunk: Function },
    Native(NativeScript),
}

impl PostScript {
    /// Compile a Lua chunk in a fresh sandbox
    pub fn lua(name: &str, source: &str) -> Result<Self> {
        let runtime = ScriptRuntime::new()?;
        let chunk = runtime.compile(name, source)?;
        Ok(PostScript::Lua { runtime, chunk })
    }

    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&mut Document, &ScriptScope<'_>) -> Result<()> + Send + Sync + 'static,
    {
        PostScript::Native(Arc::new(f))
    }

    /// Run the hook; returns the fault, already logged, if it raised
    pub fn apply(&self, doc: &mut Document, scope: &ScriptScope<'_>) -> Option<ScriptFault> {
        let result = match self {
            PostScript::Lua { runtime, chunk } => runtime.run(chunk, doc, scope),
            PostScript::Native(f) => f(doc, scope).map_err(|e| ScriptFault {
                table: scope.table.to_string(),
                entity: scope.entity.to_string(),
                message: format!("{:#}", e),
            }),
        };
        match result {
            Ok(()) => None,
            Err(fault) => {
                log::warn!("{}", fault);
                Some(fault)
            }
        }
    }
}

impl std::fmt::Debug for PostScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostScript::Lua { .. } => write!(f, "PostScript::Lua"),
            PostScript::Native(_) => write!(f, "PostScript::Native"),
        }
    }
}

/// Native callbacks keyed by (table, entity)
#[derive(Default, Clone)]
pub struct ScriptRegistry {
    native: HashMap<(String, String), NativeScript>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, table: &str, entity: &str, f: F)
    where
        F: Fn(&mut Document, &ScriptScope<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.native
            .insert((table.to_string(), entity.to_string()), Arc::new(f));
    }

    pub fn is_registered(&self, table: &str, entity: &str) -> bool {
        self.native
            .contains_key(&(table.to_string(), entity.to_string()))
    }

    /// Hook for a (table, entity) pair
    ///
    /// A registered callback takes precedence over Lua source. Lua that fails
    /// to compile is logged and treated as no script.
    pub fn resolve(&self, table: &str, entity: &str, lua_source: Option<&str>) -> Option<PostScript> {
        if let Some(f) = self.native.get(&(table.to_string(), entity.to_string())) {
            return Some(PostScript::Native(f.clone()));
        }

        let source = lua_source.filter(|s| !s.trim().is_empty())?;
        match PostScript::lua(&format!("{}/{}", table, entity), source) {
            Ok(script) => Some(script),
            Err(e) => {
                log::warn!("Ignoring script for {}/{}: {:#}", table, entity, e);
                None
            }
        }
    }
}
