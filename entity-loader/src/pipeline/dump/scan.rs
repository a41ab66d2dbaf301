//! Statement scanner for `insert into <schema>.<table> (<cols>) values (<vals>);`

use once_cell::sync::Lazy;
use regex::Regex;

static INSERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\binsert\s+into\s+").expect("valid insert regex"));

static CREATE_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bcreate\s+table\s+(?:if\s+not\s+exists\s+)?([\w"`.\p{Han}]+)"#)
        .expect("valid create table regex")
});

/// One raw INSERT statement, not yet split into values
#[derive(Debug, Clone, PartialEq)]
pub struct RawInsert<'a> {
    pub table: String,
    pub columns: Vec<String>,
    pub values: &'a str,
}

/// Outcome of scanning one `insert into` occurrence
#[derive(Debug)]
pub enum Scanned<'a> {
    Insert(RawInsert<'a>),
    /// Started like an INSERT but could not be read
    Malformed { reason: &'static str },
}

/// Scan every INSERT statement in the buffer, in order
pub fn scan_inserts(text: &str) -> Vec<Scanned<'_>> {
    let mut out = Vec::new();
    let mut pos = 0;

    while let Some(m) = INSERT_RE.find_at(text, pos) {
        let start = m.end();
        match scan_one(text, start) {
            Ok((raw, end)) => {
                out.push(Scanned::Insert(raw));
                pos = end;
            }
            Err(reason) => {
                out.push(Scanned::Malformed { reason });
                pos = start;
            }
        }
    }

    out
}

/// Table name from the first `create table` or `insert into` statement
pub fn discover_table_name(text: &str) -> Option<String> {
    if let Some(caps) = CREATE_TABLE_RE.captures(text) {
        return Some(last_segment(&caps[1]));
    }
    let m = INSERT_RE.find(text)?;
    let (name, _) = read_identifier(text, m.end())?;
    Some(last_segment(&name))
}

fn scan_one(text: &str, start: usize) -> Result<(RawInsert<'_>, usize), &'static str> {
    let (qualified, after_name) = read_identifier(text, start).ok_or("missing table name")?;
    let table = last_segment(&qualified);

    let cols_open = skip_ws(text, after_name);
    if !text[cols_open..].starts_with('(') {
        return Err("missing column list");
    }
    let cols_close = text[cols_open..]
        .find(')')
        .map(|i| cols_open + i)
        .ok_or("unclosed column list")?;
    let columns = text[cols_open + 1..cols_close]
        .split(',')
        .map(|c| c.trim().trim_matches(['"', '`']).to_string())
        .collect();

    let kw = skip_ws(text, cols_close + 1);
    let keyword = text.get(kw..kw + 6).ok_or("missing values keyword")?;
    if !keyword.eq_ignore_ascii_case("values") {
        return Err("missing values keyword");
    }

    let vals_open = skip_ws(text, kw + 6);
    if !text[vals_open..].starts_with('(') {
        return Err("missing value tuple");
    }
    let vals_close = find_tuple_end(text, vals_open + 1).ok_or("unclosed value tuple")?;

    let mut end = skip_ws(text, vals_close + 1);
    if text[end..].starts_with(';') {
        end += 1;
    }

    Ok((
        RawInsert {
            table,
            columns,
            values: &text[vals_open + 1..vals_close],
        },
        end,
    ))
}

/// Position of the `)` closing a value tuple, skipping over quoted literals
fn find_tuple_end(text: &str, from: usize) -> Option<usize> {
    let mut in_str = false;
    let mut depth = 0usize;
    let mut iter = text[from..].char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if in_str {
            if ch == '\'' {
                if matches!(iter.peek(), Some((_, '\''))) {
                    iter.next();
                } else {
                    in_str = false;
                }
            }
            continue;
        }
        match ch {
            '\'' => in_str = true,
            '(' => depth += 1,
            ')' if depth == 0 => return Some(from + i),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Read a possibly quoted, possibly schema-qualified identifier
fn read_identifier(text: &str, start: usize) -> Option<(String, usize)> {
    let mut end = start;
    for (i, ch) in text[start..].char_indices() {
        if ch.is_alphanumeric() || matches!(ch, '_' | '.' | '"' | '`' | '$') {
            end = start + i + ch.len_utf8();
        } else {
            break;
        }
    }
    if end == start {
        return None;
    }
    Some((text[start..end].to_string(), end))
}

fn last_segment(qualified: &str) -> String {
    qualified
        .rsplit('.')
        .next()
        .unwrap_or(qualified)
        .trim_matches(['"', '`'])
        .to_string()
}

fn skip_ws(text: &str, from: usize) -> usize {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}
