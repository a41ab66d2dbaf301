//! The `lib` table visible to post-projection scripts
//!
//! Helpers are grouped by what they touch: text, document paths, dates and
//! the host log. Log lines are buffered in a [`StdlibContext`] and flushed by
//! the runtime after each record, tagged with the table and entity.

use mlua::{Lua, Result as LuaResult, Table, Value, Variadic};
use std::sync::{Arc, Mutex};

use crate::pipeline::rules::date::{format_date, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMessage {
    Info(String),
    Warn(String),
}

/// Host-side state the `lib` functions write into
#[derive(Debug, Default)]
pub struct StdlibContext {
    pub logs: Vec<LogMessage>,
}

/// Install `lib` as a global
pub fn register_stdlib(lua: &Lua, context: Arc<Mutex<StdlibContext>>) -> LuaResult<()> {
    let lib = lua.create_table()?;
    register_text(lua, &lib)?;
    register_document(lua, &lib)?;
    register_dates(lua, &lib)?;
    register_logging(lua, &lib, context)?;
    lua.globals().set("lib", lib)
}

fn is_blank(v: &Value) -> LuaResult<bool> {
    Ok(match v {
        Value::Nil => true,
        Value::LightUserData(ud) => ud.0.is_null(),
        Value::String(s) => s.to_str()?.trim().is_empty(),
        _ => false,
    })
}

fn register_text(lua: &Lua, lib: &Table) -> LuaResult<()> {
    lib.set("lower", lua.create_function(|_, s: String| Ok(s.to_lowercase()))?)?;
    lib.set("upper", lua.create_function(|_, s: String| Ok(s.to_uppercase()))?)?;
    lib.set("trim", lua.create_function(|_, s: String| Ok(s.trim().to_string()))?)?;

    // lib.split(s, sep) drops empty pieces and trims the rest, like code lists
    lib.set(
        "split",
        lua.create_function(|lua, (s, sep): (String, Option<String>)| {
            let sep = sep.unwrap_or_else(|| ",".to_string());
            let parts = s.split(sep.as_str()).map(str::trim).filter(|p| !p.is_empty());
            lua.create_sequence_from(parts.map(str::to_string))
        })?,
    )?;

    lib.set("is_blank", lua.create_function(|_, v: Value| is_blank(&v))?)?;

    // first argument that is not nil, null or whitespace
    lib.set(
        "coalesce",
        lua.create_function(|_, args: Variadic<Value>| {
            for v in args {
                if !is_blank(&v)? {
                    return Ok(v);
                }
            }
            Ok(Value::Nil)
        })?,
    )?;

    lib.set(
        "to_number",
        lua.create_function(|_, v: Value| {
            Ok(match v {
                Value::Integer(i) => Some(i as f64),
                Value::Number(n) => Some(n),
                Value::String(s) => s.to_str()?.trim().parse::<f64>().ok(),
                _ => None,
            })
        })?,
    )?;
    Ok(())
}

/// `lib.get(tbl, "a.b")` and `lib.set(tbl, "a.b", v)` walk dotted paths,
/// `set` creating intermediate tables
fn register_document(lua: &Lua, lib: &Table) -> LuaResult<()> {
    lib.set(
        "get",
        lua.create_function(|_, (root, path): (Table, String)| {
            let mut current = Value::Table(root);
            for segment in path.split('.') {
                current = match current {
                    Value::Table(t) => t.get(segment)?,
                    _ => return Ok(Value::Nil),
                };
            }
            Ok(current)
        })?,
    )?;

    lib.set(
        "set",
        lua.create_function(|lua, (root, path, value): (Table, String, Value)| {
            let segments: Vec<&str> = path.split('.').collect();
            let Some((last, parents)) = segments.split_last() else {
                return Ok(());
            };
            let mut current = root;
            for segment in parents {
                current = match current.get::<Value>(*segment)? {
                    Value::Table(t) => t,
                    _ => {
                        let t = lua.create_table()?;
                        current.set(*segment, t.clone())?;
                        t
                    }
                };
            }
            current.set(*last, value)
        })?,
    )?;
    Ok(())
}

fn register_dates(lua: &Lua, lib: &Table) -> LuaResult<()> {
    lib.set(
        "now",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()))?,
    )?;

    // same rules as the `date(...)` mapping rule
    lib.set(
        "format_date",
        lua.create_function(|_, (format, value): (String, Value)| {
            let value = match value {
                Value::Integer(i) => crate::pipeline::Value::Int(i),
                Value::Number(n) => crate::pipeline::Value::Float(n),
                Value::String(s) => crate::pipeline::Value::String(s.to_str()?.to_string()),
                _ => crate::pipeline::Value::Null,
            };
            Ok(format_date(&format, &value))
        })?,
    )?;

    // epoch seconds of a `YYYY-MM-DD[ HH:MM:SS]` string, nil if unparsable
    lib.set(
        "epoch",
        lua.create_function(|_, s: String| Ok(parse_timestamp(&s).map(|t| t.and_utc().timestamp())))?,
    )?;
    Ok(())
}

fn register_logging(lua: &Lua, lib: &Table, context: Arc<Mutex<StdlibContext>>) -> LuaResult<()> {
    for (name, warn) in [("log", false), ("warn", true)] {
        let context = context.clone();
        let f = lua.create_function(move |_, msg: String| {
            let message = if warn {
                LogMessage::Warn(msg)
            } else {
                LogMessage::Info(msg)
            };
            match context.lock() {
                Ok(mut ctx) => ctx.logs.push(message),
                Err(poisoned) => poisoned.into_inner().logs.push(message),
            }
            Ok(())
        })?;
        lib.set(name, f)?;
    }
    Ok(())
}
