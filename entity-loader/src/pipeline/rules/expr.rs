//! Parsed rule forms

use super::pyexpr::PyExpr;
use crate::pipeline::cache::LookupTarget;

/// A rule after matching, ready to evaluate against many records
#[derive(Debug, Clone, PartialEq)]
pub enum RuleExpr {
    /// `date(<format>, <source>)`
    Date { format: String, source: Box<RuleExpr> },
    /// `coalesce(a, b, ...)`
    Coalesce(Vec<RuleExpr>),
    /// `concat(a, b, ...)`
    Concat(Vec<RuleExpr>),
    /// Lookup against the entity store
    Entity(EntityRef),
    /// Lookup against another table's dump
    Dump(DumpRef),
    /// `py:{...}.get(key, default)` with comma fan-out on the key
    CodeTable(CodeTable),
    /// Any other `py:` expression
    Py(PyExpr),
    Atom(Atom),
    /// Recognized but unusable (bad `py:` syntax, nesting too deep); evaluates to nothing
    Unresolvable(String),
}

/// Final-fallback operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// Quoted text
    Literal(String),
    /// `record.<f>`; a missing field is empty
    Field(String),
    /// A field name if the record has it, otherwise the text itself
    Ref(String),
}

/// Where an entity lookup takes its key value from
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// First non-blank of these record fields
    Fields(Vec<String>),
    /// A nested rule, evaluated first
    Expr(Box<RuleExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRef {
    pub entity_type: String,
    pub key_field: String,
    pub source: KeySource,
    pub target: LookupTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DumpRef {
    pub table: String,
    pub key_field: String,
    pub source: Box<RuleExpr>,
    pub target_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeTable {
    pub entries: Vec<(PyExpr, PyExpr)>,
    pub key: PyExpr,
    pub default: Option<PyExpr>,
}

impl RuleExpr {
    pub fn literal(text: impl Into<String>) -> Self {
        RuleExpr::Atom(Atom::Literal(text.into()))
    }

    /// Short name of the form, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            RuleExpr::Date { .. } => "date",
            RuleExpr::Coalesce(_) => "coalesce",
            RuleExpr::Concat(_) => "concat",
            RuleExpr::Entity(_) => "entity",
            RuleExpr::Dump(_) => "dump",
            RuleExpr::CodeTable(_) => "code_table",
            RuleExpr::Py(_) => "py",
            RuleExpr::Atom(_) => "atom",
            RuleExpr::Unresolvable(_) => "unresolvable",
        }
    }
}
