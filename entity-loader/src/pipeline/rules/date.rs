//! `date(<format>, <field>)` rendering

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt::Write;

use crate::pipeline::Value;

/// Epoch values above this are taken as milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Render a value with a strftime format
///
/// Empty input renders empty. Values that do not parse as a timestamp come
/// back as their date-only prefix.
pub fn format_date(format: &str, value: &Value) -> String {
    if value.is_blank() {
        return String::new();
    }

    let parsed = match value {
        Value::Int(i) => from_epoch(*i),
        Value::Float(f) => from_epoch(*f as i64),
        other => parse_timestamp(other.to_text().trim()),
    };

    let raw = value.to_text();
    match parsed {
        Some(dt) => render(&dt, format).unwrap_or_else(|| date_prefix(&raw)),
        None => {
            log::debug!("date(): unparsable value '{}'", raw);
            date_prefix(&raw)
        }
    }
}

/// Parse `YYYY-MM-DD[ HH:MM:SS[.ffffff]]`, RFC 3339 or a numeric epoch
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }

    let digits = s.strip_prefix('-').unwrap_or(s);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch);
    }

    let trimmed = s.split('.').next().unwrap_or(s);
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Seconds or milliseconds since the epoch, UTC
pub fn from_epoch(value: i64) -> Option<NaiveDateTime> {
    let dt = if value.unsigned_abs() > MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::<Utc>::from_timestamp_millis(value)
    } else {
        DateTime::<Utc>::from_timestamp(value, 0)
    };
    dt.map(|d| d.naive_utc())
}

fn render(dt: &NaiveDateTime, format: &str) -> Option<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        log::debug!("date(): invalid format '{}'", format);
        return None;
    }
    let mut out = String::new();
    write!(out, "{}", dt.format_with_items(items.into_iter())).ok()?;
    Some(out)
}

fn date_prefix(raw: &str) -> String {
    let s = raw.trim();
    let end = s.find([' ', 'T']).unwrap_or(s.len());
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_datetime_with_fraction() {
        let v = Value::from("2024-01-02 03:04:05.000");
        assert_eq!(format_date("%Y-%m-%d", &v), "2024-01-02");
        assert_eq!(format_date("%H:%M", &v), "03:04");
    }

    #[test]
    fn test_format_date_only() {
        assert_eq!(format_date("%Y/%m/%d", &Value::from("2024-09-27")), "2024/09/27");
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        assert_eq!(format_date("%Y-%m-%d", &Value::Int(1_704_164_645)), "2024-01-02");
        assert_eq!(format_date("%Y-%m-%d", &Value::Int(1_704_164_645_000)), "2024-01-02");
        assert_eq!(format_date("%Y-%m-%d", &Value::from("1704164645")), "2024-01-02");
    }

    #[test]
    fn test_extreme_epochs_do_not_parse() {
        assert_eq!(from_epoch(i64::MIN), None);
        assert_eq!(from_epoch(i64::MAX), None);
        let out = format_date("%Y", &Value::Int(i64::MIN));
        assert!(out.starts_with("-922"));
        assert!(parse_timestamp("-9223372036854775808").is_none());
    }

    #[test]
    fn test_unparsable_degrades_to_prefix() {
        assert_eq!(format_date("%Y", &Value::from("2024-13-45 99:00")), "2024-13-45");
        assert_eq!(format_date("%Y", &Value::from("soon")), "soon");
    }

    #[test]
    fn test_blank_is_empty() {
        assert_eq!(format_date("%Y", &Value::empty()), "");
        assert_eq!(format_date("%Y", &Value::Null), "");
    }
}
