//! Restricted Python-flavoured expressions for `py:` rules

mod ast;
mod eval;
mod parser;

pub use ast::*;
pub use eval::{EvalError, NameResolver, dict_get, eval, py_eq};
pub use parser::{ParseError, parse_expr};

use super::scope::RecordView;
use crate::pipeline::Value;

impl NameResolver for RecordView<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name)
    }
}
