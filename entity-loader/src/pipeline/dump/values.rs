//! Value tuple splitting and literal coercion

use crate::pipeline::Value;

/// Split the inside of a `values (...)` tuple into typed values
///
/// Single left-to-right scan carrying an in-string flag: commas inside a
/// quoted literal do not split, and a doubled quote inside a literal decodes
/// to one quote character.
pub fn split_values(raw: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut field = Field::default();
    let mut in_str = false;
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_str {
            if ch == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    field.quoted.push('\'');
                } else {
                    in_str = false;
                }
            } else {
                field.quoted.push(ch);
            }
            continue;
        }

        match ch {
            '\'' => {
                in_str = true;
                field.was_quoted = true;
            }
            ',' => out.push(std::mem::take(&mut field).finish()),
            _ => field.bare.push(ch),
        }
    }
    out.push(field.finish());
    out
}

#[derive(Default)]
struct Field {
    quoted: String,
    bare: String,
    was_quoted: bool,
}

impl Field {
    fn finish(self) -> Value {
        if self.was_quoted {
            let mut text = self.quoted;
            text.push_str(self.bare.trim());
            return Value::String(text);
        }
        coerce_bare(self.bare.trim())
    }
}

/// Coerce an unquoted token: NULL-ish -> "", integers, single-dot floats,
/// anything else stays text
pub fn coerce_bare(token: &str) -> Value {
    if token.eq_ignore_ascii_case("null") || token.eq_ignore_ascii_case("none") {
        return Value::empty();
    }

    let digits = token.strip_prefix('-').unwrap_or(token);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(i) = token.parse::<i64>() {
            return Value::Int(i);
        }
        return Value::String(token.to_string());
    }

    if token.matches('.').count() == 1 {
        let numeric = digits.chars().all(|c| c.is_ascii_digit() || c == '.') && digits.len() > 1;
        if numeric {
            if let Ok(f) = token.parse::<f64>() {
                return Value::Float(f);
            }
        }
    }

    Value::String(token.to_string())
}
