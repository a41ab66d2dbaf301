//! The mapping rule language
//!
//! A rule is matched against an ordered table of forms (`date`, `coalesce`,
//! `concat`, entity and dump lookups, `py:`), falling back to a bare atom.
//! Unrecognized syntax is never an error.

pub mod date;
mod evaluator;
mod expr;
mod matchers;
pub mod pyexpr;
mod scope;
mod syntax;

pub use evaluator::Evaluator;
pub use expr::{Atom, CodeTable, DumpRef, EntityRef, KeySource, RuleExpr};
pub use matchers::{MATCHERS, MAX_DEPTH, parse_atom, parse_rule};
pub use scope::{RecordView, lookup_path};

/// Separator splitting one rule into per-target sub-rules
pub const FAN_OUT_SEPARATOR: &str = "||";

/// Split a rule on top-level `||` into trimmed sub-rules
pub fn split_fan_out(rule: &str) -> Vec<&str> {
    syntax::split_top_level(rule, FAN_OUT_SEPARATOR)
        .into_iter()
        .map(str::trim)
        .collect()
}

/// A mapping rule parsed once, reused for every record of a table
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub source: String,
    pub parts: Vec<RuleExpr>,
}

impl CompiledRule {
    pub fn compile(rule: &str) -> Self {
        CompiledRule {
            source: rule.to_string(),
            parts: split_fan_out(rule).into_iter().map(parse_rule).collect(),
        }
    }

    pub fn is_fan_out(&self) -> bool {
        self.parts.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fan_out() {
        assert_eq!(split_fan_out("a || concat(b,c) ||'x'"), vec!["a", "concat(b,c)", "'x'"]);
        assert_eq!(split_fan_out("py: a or b"), vec!["py: a or b"]);
    }

    #[test]
    fn test_compiled_rule() {
        let rule = CompiledRule::compile("coalesce(a,b) || date(%Y, ts)");
        assert!(rule.is_fan_out());
        assert_eq!(rule.parts[0].kind(), "coalesce");
        assert_eq!(rule.parts[1].kind(), "date");
        assert!(!CompiledRule::compile("a").is_fan_out());
    }
}
