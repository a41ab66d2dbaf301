//! Lexical helpers shared by the rule matchers
//!
//! Rules are matched by shape, not tokenized up front, so these helpers work
//! on raw string slices and only need to know about quotes and nesting.

/// Split on `sep` wherever it appears outside quotes and brackets
pub fn split_top_level<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut iter = s.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ if depth == 0 && s[i..].starts_with(sep) => {
                parts.push(&s[start..i]);
                start = i + sep.len();
                // skip the rest of a multi-char separator
                for _ in 1..sep.chars().count() {
                    iter.next();
                }
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Whether `sep` occurs outside quotes and brackets
pub fn contains_top_level(s: &str, sep: &str) -> bool {
    split_top_level(s, sep).len() > 1
}

/// Index of the bracket closing the one opened at `open`
pub fn matching_close(s: &str, open: usize) -> Option<usize> {
    let open_ch = s[open..].chars().next()?;
    let close_ch = match open_ch {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        _ => return None,
    };

    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, ch) in s[open..].char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            c if c == open_ch => depth += 1,
            c if c == close_ch => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Match `<name>(<args>)<rest>` case-insensitively on the name.
/// Returns the argument text and whatever follows the closing paren.
pub fn strip_call<'a>(s: &'a str, name: &str) -> Option<(&'a str, &'a str)> {
    let head = s.get(..name.len())?;
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    let after = &s[name.len()..];
    let open = name.len() + (after.len() - after.trim_start().len());
    if !s[open..].starts_with('(') {
        return None;
    }
    let close = matching_close(s, open)?;
    Some((&s[open + 1..close], &s[close + 1..]))
}

/// Strip matching single or double quotes
pub fn unquote(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.len() >= 2 {
        for q in ['\'', '"'] {
            if s.starts_with(q) && s.ends_with(q) {
                return Some(&s[1..s.len() - 1]);
            }
        }
    }
    None
}

/// Split `lhs=rhs` at the first top-level single `=` (not `==`, `<=`, `>=`, `!=`)
pub fn split_assignment(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let bytes = s.as_bytes();

    for (i, ch) in s.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if matches!(prev, Some(b'=' | b'<' | b'>' | b'!')) || next == Some(b'=') {
                    continue;
                }
                return Some((s[..i].trim(), s[i + 1..].trim()));
            }
            _ => {}
        }
    }
    None
}

/// Identifier made of word characters and dots
pub fn is_path(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !s.starts_with('.')
        && !s.ends_with('.')
}

/// Identifier made of word characters only
pub fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_top_level_respects_nesting() {
        assert_eq!(
            split_top_level("a, concat(b,c), 'x,y'", ","),
            vec!["a", " concat(b,c)", " 'x,y'"]
        );
        assert_eq!(split_top_level("a||b||'|'", "||"), vec!["a", "b", "'|'"]);
        assert_eq!(split_top_level("", ","), vec![""]);
    }

    #[test]
    fn test_contains_top_level() {
        assert!(contains_top_level("a || b", "||"));
        assert!(!contains_top_level("py:x or 'a||b'", "||"));
    }

    #[test]
    fn test_strip_call() {
        assert_eq!(strip_call("concat(a,b)", "concat"), Some(("a,b", "")));
        assert_eq!(strip_call("COALESCE (a)", "coalesce"), Some(("a", "")));
        assert_eq!(
            strip_call("entity(fund, by=code).data.name", "entity"),
            Some(("fund, by=code", ".data.name"))
        );
        assert_eq!(strip_call("entity_rel(a,1)", "entity"), None);
        assert_eq!(strip_call("concat(a", "concat"), None);
    }

    #[test]
    fn test_split_assignment() {
        assert_eq!(split_assignment("data.code=code"), Some(("data.code", "code")));
        assert_eq!(
            split_assignment("id=entity(a:id=b).uuid"),
            Some(("id", "entity(a:id=b).uuid"))
        );
        assert_eq!(split_assignment("a==b"), None);
        assert_eq!(split_assignment("a<=b"), None);
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'abc'"), Some("abc"));
        assert_eq!(unquote(" \"x\" "), Some("x"));
        assert_eq!(unquote("abc"), None);
        assert_eq!(unquote("'"), None);
    }
}
