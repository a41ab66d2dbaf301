//! Ordered rule matchers
//!
//! Each matcher recognizes one surface form and builds its `RuleExpr`, or
//! declines with `None`. The first matcher that accepts wins; a rule nobody
//! accepts becomes a bare atom.

use super::expr::{Atom, CodeTable, DumpRef, EntityRef, KeySource, RuleExpr};
use super::pyexpr::{PyExpr, parse_expr};
use super::syntax::{
    is_ident, is_path, matching_close, split_assignment, split_top_level, strip_call, unquote,
};
use crate::pipeline::cache::LookupTarget;
use crate::pipeline::{DEFAULT_KEY_FIELD, strip_data_prefix};

/// Nested lookups deeper than this do not resolve
pub const MAX_DEPTH: usize = 8;

type Matcher = fn(&str, usize) -> Option<RuleExpr>;

/// Matchers in priority order
pub const MATCHERS: &[(&str, Matcher)] = &[
    ("date", match_date),
    ("coalesce", match_coalesce),
    ("concat", match_concat),
    ("entity", match_entity_simple),
    ("entity_join", match_entity_join),
    ("rel", match_rel),
    ("entity_rel", match_entity_rel),
    ("sql", match_sql),
    ("source", match_source),
    ("fetch", match_fetch),
    ("py", match_py),
];

/// Parse a single rule (no `||` fan-out)
pub fn parse_rule(rule: &str) -> RuleExpr {
    parse_at(rule, 0)
}

pub(crate) fn parse_at(rule: &str, depth: usize) -> RuleExpr {
    let rule = rule.trim();
    if depth > MAX_DEPTH {
        log::debug!("Rule nesting deeper than {} levels: '{}'", MAX_DEPTH, rule);
        return RuleExpr::Unresolvable(format!("nesting deeper than {} levels", MAX_DEPTH));
    }

    for (name, matcher) in MATCHERS {
        if let Some(expr) = matcher(rule, depth) {
            log::trace!("Rule '{}' matched {}", rule, name);
            return expr;
        }
    }

    log::trace!("Rule '{}' matched no form, treating as atom", rule);
    RuleExpr::Atom(parse_atom(rule))
}

/// Quoted literal, `record.<field>`, or a reference that falls back to its own text
pub fn parse_atom(s: &str) -> Atom {
    let s = s.trim();
    if let Some(inner) = unquote(s) {
        return Atom::Literal(inner.to_string());
    }
    if let Some(field) = s.strip_prefix("record.") {
        return Atom::Field(field.to_string());
    }
    if s.is_empty() {
        return Atom::Literal(String::new());
    }
    Atom::Ref(s.to_string())
}

/// Entity type names allow a little more than identifiers
fn is_type_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Text after a call's closing paren: `.path` -> `path`
fn trailing_path(rest: &str) -> Option<&str> {
    let path = rest.trim().strip_prefix('.')?.trim();
    is_path(path).then_some(path)
}

fn args_of<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let (args, rest) = strip_call(s, name)?;
    rest.trim().is_empty().then_some(args)
}

fn match_date(s: &str, depth: usize) -> Option<RuleExpr> {
    let args = args_of(s, "date")?;
    let parts = split_top_level(args, ",");
    if parts.len() < 2 {
        // date(x) with no format degrades to its argument text
        return Some(RuleExpr::literal(args.trim()));
    }
    let raw_format = parts[0].trim();
    let format = unquote(raw_format).unwrap_or(raw_format).to_string();
    let source = &args[parts[0].len() + 1..];
    Some(RuleExpr::Date {
        format,
        source: Box::new(parse_at(source, depth + 1)),
    })
}

fn list_args(args: &str, depth: usize) -> Vec<RuleExpr> {
    split_top_level(args, ",")
        .into_iter()
        .map(|a| parse_at(a, depth + 1))
        .collect()
}

fn match_coalesce(s: &str, depth: usize) -> Option<RuleExpr> {
    args_of(s, "coalesce").map(|args| RuleExpr::Coalesce(list_args(args, depth)))
}

fn match_concat(s: &str, depth: usize) -> Option<RuleExpr> {
    args_of(s, "concat").map(|args| RuleExpr::Concat(list_args(args, depth)))
}

/// `<type>, by=<key>, src=<field>` argument list
fn simple_lookup_args(args: &str) -> Option<(String, String, KeySource)> {
    let parts = split_top_level(args, ",");
    let entity_type = parts[0].trim();
    if !is_type_name(entity_type) {
        return None;
    }

    let mut key_field = DEFAULT_KEY_FIELD.to_string();
    let mut src: Option<String> = None;
    for part in &parts[1..] {
        let (k, v) = split_assignment(part)?;
        let v = unquote(v).unwrap_or(v);
        match k {
            "by" if is_path(v) => key_field = strip_data_prefix(v).to_string(),
            "src" if is_path(v) => src = Some(v.to_string()),
            _ => return None,
        }
    }

    let primary = src.unwrap_or_else(|| format!("{}_id", entity_type));
    let mut fields = vec![primary];
    if fields[0] != "id" {
        fields.push("id".to_string());
    }
    Some((entity_type.to_string(), key_field, KeySource::Fields(fields)))
}

/// `entity(<type>, by=<key>, src=<field>).<path>`
fn match_entity_simple(s: &str, _depth: usize) -> Option<RuleExpr> {
    let (args, rest) = strip_call(s, "entity")?;
    let path = trailing_path(rest)?;
    let (entity_type, key_field, source) = simple_lookup_args(args)?;
    Some(RuleExpr::Entity(EntityRef {
        entity_type,
        key_field,
        source,
        target: LookupTarget::parse(path),
    }))
}

/// `entity(<type>:<keyPath>=<sourceExpr>).<path>`
fn match_entity_join(s: &str, depth: usize) -> Option<RuleExpr> {
    let (args, rest) = strip_call(s, "entity")?;
    let path = trailing_path(rest)?;
    let (entity_type, condition) = args.split_once(':')?;
    let entity_type = entity_type.trim();
    if !is_type_name(entity_type) {
        return None;
    }
    let (key_path, source_expr) = split_assignment(condition)?;
    if !is_path(key_path) {
        return None;
    }
    Some(RuleExpr::Entity(EntityRef {
        entity_type: entity_type.to_string(),
        key_field: strip_data_prefix(key_path).to_string(),
        source: KeySource::Expr(Box::new(parse_at(source_expr, depth + 1))),
        target: LookupTarget::parse(path),
    }))
}

/// `rel(<type>, by=<key>, src=<field>)`, resolving to the external id
fn match_rel(s: &str, _depth: usize) -> Option<RuleExpr> {
    let args = args_of(s, "rel")?;
    let (entity_type, key_field, source) = simple_lookup_args(args)?;
    Some(RuleExpr::Entity(EntityRef {
        entity_type,
        key_field,
        source,
        target: LookupTarget::ExternalId,
    }))
}

/// `entity_rel(<type>, <idExpr>[, <field>])`
fn match_entity_rel(s: &str, depth: usize) -> Option<RuleExpr> {
    let args = args_of(s, "entity_rel")?;
    let parts = split_top_level(args, ",");
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let entity_type = parts[0].trim();
    if !is_type_name(entity_type) {
        return None;
    }
    let target = match parts.get(2) {
        Some(field) => {
            let field = field.trim();
            LookupTarget::parse(unquote(field).unwrap_or(field))
        }
        None => LookupTarget::ExternalId,
    };
    Some(RuleExpr::Entity(EntityRef {
        entity_type: entity_type.to_string(),
        key_field: DEFAULT_KEY_FIELD.to_string(),
        source: KeySource::Expr(Box::new(parse_at(parts[1], depth + 1))),
        target,
    }))
}

/// Key field of a dump condition's left side, dropping `sql.` and `<table>.` qualifiers
fn dump_key_field<'a>(lhs: &'a str, table: &str) -> Option<&'a str> {
    let lhs = lhs.trim();
    let lhs = lhs.strip_prefix("sql.").unwrap_or(lhs);
    let lhs = lhs
        .strip_prefix(table)
        .and_then(|r| r.strip_prefix('.'))
        .unwrap_or(lhs);
    is_ident(lhs).then_some(lhs)
}

/// `sql.<table>(sql.<table>.<field>=<sourceExpr>).<target>`
fn match_sql(s: &str, depth: usize) -> Option<RuleExpr> {
    let head = s.get(..4)?;
    if !head.eq_ignore_ascii_case("sql.") {
        return None;
    }
    let open = s.find('(')?;
    let table = s[4..open].trim();
    if !is_ident(table) {
        return None;
    }
    let close = matching_close(s, open)?;
    let target = trailing_path(&s[close + 1..])?;
    let (lhs, rhs) = split_assignment(&s[open + 1..close])?;
    let key_field = dump_key_field(lhs, table)?;

    Some(RuleExpr::Dump(DumpRef {
        table: table.to_string(),
        key_field: key_field.to_string(),
        source: Box::new(parse_at(rhs, depth + 1)),
        target_field: target.to_string(),
    }))
}

/// `source(<table>.<field>=<sourceExpr>).<target>`
fn match_source(s: &str, depth: usize) -> Option<RuleExpr> {
    let (args, rest) = strip_call(s, "source")?;
    let target = trailing_path(rest)?;
    let (lhs, rhs) = split_assignment(args)?;
    let (table, field) = lhs.split_once('.')?;
    if !is_ident(table) || !is_ident(field) {
        return None;
    }
    Some(RuleExpr::Dump(DumpRef {
        table: table.to_string(),
        key_field: field.to_string(),
        source: Box::new(parse_at(rhs, depth + 1)),
        target_field: target.to_string(),
    }))
}

/// `fetch(table=<t>, key=<k>, value=<expr>, field=<f>)`
fn match_fetch(s: &str, depth: usize) -> Option<RuleExpr> {
    let args = args_of(s, "fetch")?;
    let (mut table, mut key, mut value, mut field) = (None, None, None, None);

    for part in split_top_level(args, ",") {
        let (k, v) = split_assignment(part)?;
        let name = unquote(v).unwrap_or(v).to_string();
        match k {
            "table" => table = Some(name),
            "key" => key = Some(name),
            "field" => field = Some(name),
            "value" => value = Some(parse_at(v, depth + 1)),
            _ => return None,
        }
    }

    let (table, key_field, source, target_field) = (table?, key?, value?, field?);
    if !is_ident(&table) || !is_ident(&key_field) || !is_ident(&target_field) {
        return None;
    }
    Some(RuleExpr::Dump(DumpRef {
        table,
        key_field,
        source: Box::new(source),
        target_field,
    }))
}

/// `py:<expr>`, with the `{...}.get(key, default)` code-table form split out
fn match_py(s: &str, _depth: usize) -> Option<RuleExpr> {
    let head = s.get(..3)?;
    if !head.eq_ignore_ascii_case("py:") {
        return None;
    }
    let src = s[3..].trim();

    let expr = match parse_expr(src) {
        Ok(expr) => expr,
        Err(e) => {
            log::debug!("py: rule '{}' does not parse: {}", src, e);
            return Some(RuleExpr::Unresolvable(format!("py syntax error {}", e)));
        }
    };

    if let PyExpr::Method { object, method, args } = &expr {
        if let (PyExpr::Dict(entries), "get", 1..=2) = (object.as_ref(), method.as_str(), args.len()) {
            return Some(RuleExpr::CodeTable(CodeTable {
                entries: entries.clone(),
                key: args[0].clone(),
                default: args.get(1).cloned(),
            }));
        }
    }

    Some(RuleExpr::Py(expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_source(names: &[&str]) -> KeySource {
        KeySource::Fields(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_date_matcher() {
        let expr = parse_rule("date(%Y-%m-%d, ts)");
        assert_eq!(
            expr,
            RuleExpr::Date {
                format: "%Y-%m-%d".to_string(),
                source: Box::new(RuleExpr::Atom(Atom::Ref("ts".to_string()))),
            }
        );
        assert_eq!(match_date("date(ts)", 0), Some(RuleExpr::literal("ts")));
        assert_eq!(match_date("date(%Y, ts) + 1", 0), None);
    }

    #[test]
    fn test_coalesce_and_concat() {
        let expr = parse_rule("coalesce(a, 'b', record.c)");
        assert_eq!(
            expr,
            RuleExpr::Coalesce(vec![
                RuleExpr::Atom(Atom::Ref("a".into())),
                RuleExpr::Atom(Atom::Literal("b".into())),
                RuleExpr::Atom(Atom::Field("c".into())),
            ])
        );
        let RuleExpr::Concat(parts) = parse_rule("concat(code, '-', date(%Y, ts))") else {
            panic!("expected concat");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].kind(), "date");
    }

    #[test]
    fn test_entity_simple_defaults() {
        let RuleExpr::Entity(e) = parse_rule("entity(fund).data.name") else {
            panic!("expected entity lookup");
        };
        assert_eq!(e.entity_type, "fund");
        assert_eq!(e.key_field, "id");
        assert_eq!(e.source, field_source(&["fund_id", "id"]));
        assert_eq!(e.target, LookupTarget::Path("name".into()));

        let RuleExpr::Entity(e) = parse_rule("entity(fund, by=code, src=fund_code).uuid") else {
            panic!("expected entity lookup");
        };
        assert_eq!(e.key_field, "code");
        assert_eq!(e.source, field_source(&["fund_code", "id"]));
        assert_eq!(e.target, LookupTarget::ExternalId);
    }

    #[test]
    fn test_entity_join_nested() {
        let rule = "entity(firm:data.id=entity(fund:code=fund_code).data.firm_id).uuid";
        let RuleExpr::Entity(outer) = parse_rule(rule) else {
            panic!("expected entity lookup");
        };
        assert_eq!(outer.entity_type, "firm");
        assert_eq!(outer.key_field, "id");
        let KeySource::Expr(inner) = outer.source else {
            panic!("expected nested source");
        };
        let RuleExpr::Entity(inner) = *inner else {
            panic!("expected nested entity lookup");
        };
        assert_eq!(inner.entity_type, "fund");
        assert_eq!(inner.target, LookupTarget::Path("firm_id".into()));
    }

    #[test]
    fn test_rel_and_entity_rel() {
        let RuleExpr::Entity(e) = parse_rule("rel(company)") else {
            panic!("expected rel");
        };
        assert_eq!(e.target, LookupTarget::ExternalId);
        assert_eq!(e.source, field_source(&["company_id", "id"]));

        let RuleExpr::Entity(e) = parse_rule("entity_rel(company, record.cid, 'name')") else {
            panic!("expected entity_rel");
        };
        assert_eq!(e.key_field, "id");
        assert_eq!(e.target, LookupTarget::Name);
    }

    #[test]
    fn test_dump_lookup_forms_agree() {
        let forms = [
            "sql.ct_city(sql.ct_city.id=city_id).name",
            "sql.ct_city(id=city_id).name",
            "source(ct_city.id=city_id).name",
            "fetch(table='ct_city', key='id', value=city_id, field='name')",
        ];
        for form in forms {
            let RuleExpr::Dump(d) = parse_rule(form) else {
                panic!("expected dump lookup for {}", form);
            };
            assert_eq!(d.table, "ct_city", "{}", form);
            assert_eq!(d.key_field, "id", "{}", form);
            assert_eq!(d.target_field, "name", "{}", form);
            assert_eq!(*d.source, RuleExpr::Atom(Atom::Ref("city_id".into())), "{}", form);
        }
    }

    #[test]
    fn test_py_code_table_split_out() {
        assert_eq!(parse_rule("py:{'1':'x','2':'y'}.get(code,'?')").kind(), "code_table");
        assert_eq!(parse_rule("py: code.upper()").kind(), "py");
        assert_eq!(parse_rule("py: (((").kind(), "unresolvable");
    }

    #[test]
    fn test_fallthrough_to_atom() {
        assert_eq!(parse_rule("'fixed'"), RuleExpr::Atom(Atom::Literal("fixed".into())));
        assert_eq!(parse_rule("record.x"), RuleExpr::Atom(Atom::Field("x".into())));
        assert_eq!(parse_rule("entity(broken"), RuleExpr::Atom(Atom::Ref("entity(broken".into())));
        assert_eq!(parse_rule("concat(a) tail"), RuleExpr::Atom(Atom::Ref("concat(a) tail".into())));
    }

    #[test]
    fn test_depth_guard() {
        let mut rule = "x".to_string();
        for _ in 0..(MAX_DEPTH + 2) {
            rule = format!("concat({})", rule);
        }
        fn deepest(expr: &RuleExpr) -> &RuleExpr {
            match expr {
                RuleExpr::Concat(parts) => deepest(&parts[0]),
                other => other,
            }
        }
        assert_eq!(deepest(&parse_rule(&rule)).kind(), "unresolvable");
    }

    #[test]
    fn test_deep_py_rule_is_unresolvable() {
        // same stack size a tokio worker gets
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let rule = format!("py:{}1{}", "(".repeat(150), ")".repeat(150));
                parse_rule(&rule).kind()
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), "unresolvable");
    }
}
