//! Bulk-insert dump extraction
//!
//! Lenient by policy: malformed statements are dropped and counted, a missing
//! file is an empty table, and nothing in here returns a parse error.

mod encoding;
mod scan;
mod values;

pub use encoding::{decode_dump, read_dump_text};
pub use scan::discover_table_name;
pub use values::{coerce_bare, split_values};

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::SourceRecord;
use scan::{Scanned, scan_inserts};

/// Records extracted from one dump, plus the number of statements dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpParse {
    pub records: Vec<SourceRecord>,
    pub skipped: usize,
}

/// Parse every INSERT statement in a decoded dump buffer
pub fn parse_dump(text: &str) -> DumpParse {
    let mut parse = DumpParse::default();

    for scanned in scan_inserts(text) {
        match scanned {
            Scanned::Insert(raw) => {
                let values = split_values(raw.values);
                let (cols, vals) = (raw.columns.len(), values.len());
                match SourceRecord::from_columns(raw.columns, values) {
                    Some(record) => parse.records.push(record),
                    None => {
                        log::debug!(
                            "Skipping insert into {}: {} columns but {} values",
                            raw.table,
                            cols,
                            vals
                        );
                        parse.skipped += 1;
                    }
                }
            }
            Scanned::Malformed { reason } => {
                log::debug!("Skipping malformed insert statement: {}", reason);
                parse.skipped += 1;
            }
        }
    }

    parse
}

/// Records only, in statement order
pub fn extract_records(text: &str) -> Vec<SourceRecord> {
    parse_dump(text).records
}

/// Read, decode and parse a dump file. A missing file parses as empty.
pub fn read_dump_file(path: &Path) -> Result<DumpParse> {
    match read_dump_text(path)? {
        Some(text) => Ok(parse_dump(&text)),
        None => {
            log::debug!("Dump file not found: {}", path.display());
            Ok(DumpParse::default())
        }
    }
}

/// Column list of the first well-formed INSERT in a dump file
pub fn discover_columns(path: &Path) -> Result<Vec<String>> {
    let Some(text) = read_dump_text(path)? else {
        return Ok(Vec::new());
    };
    Ok(scan_inserts(&text)
        .into_iter()
        .find_map(|s| match s {
            Scanned::Insert(raw) => Some(raw.columns),
            Scanned::Malformed { .. } => None,
        })
        .unwrap_or_default())
}

/// Conventional dump location for a table: `<dir>/<table>.sql`
pub fn dump_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.sql", table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Value;

    #[test]
    fn test_parse_example_statement() {
        let parse = parse_dump("insert into public.t (id,name) values (1,'A''B');");
        assert_eq!(parse.records.len(), 1);
        assert_eq!(parse.skipped, 0);

        let rec = &parse.records[0];
        assert_eq!(rec.get("id"), Some(&Value::Int(1)));
        assert_eq!(rec.get("name"), Some(&Value::from("A'B")));
    }

    #[test]
    fn test_statement_order_and_columns() {
        let text = "\
insert into public.fund (code, name, nav) values ('F1', 'One', 1.25);
insert into public.fund (code, name, nav) values ('F2', 'Two, Inc', NULL);
insert into public.fund (code, name, nav) values ('F3', 'Three', -4);
";
        let parse = parse_dump(text);
        assert_eq!(parse.records.len(), 3);
        for rec in &parse.records {
            assert_eq!(rec.columns().collect::<Vec<_>>(), vec!["code", "name", "nav"]);
        }
        assert_eq!(parse.records[0].get("nav"), Some(&Value::Float(1.25)));
        assert_eq!(parse.records[1].get("name"), Some(&Value::from("Two, Inc")));
        assert_eq!(parse.records[1].get("nav"), Some(&Value::empty()));
        assert_eq!(parse.records[2].get("code"), Some(&Value::from("F3")));
        assert_eq!(parse.records[2].get("nav"), Some(&Value::Int(-4)));
    }

    #[test]
    fn test_arity_mismatch_is_skipped() {
        let text = "\
insert into public.t (a, b) values (1);
insert into public.t (a, b) values (1, 2);
";
        let parse = parse_dump(text);
        assert_eq!(parse.records.len(), 1);
        assert_eq!(parse.skipped, 1);
    }

    #[test]
    fn test_garbage_never_panics() {
        let parse = parse_dump("insert into ((( values ''' ;; insert into x");
        assert!(parse.records.is_empty());
        assert!(parse.skipped >= 1);
    }

    #[test]
    fn test_read_dump_file_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dump_path(dir.path(), "ct_city");
        std::fs::write(
            &path,
            "insert into public.ct_city (id, city_name) values (7, 'Paris');\n",
        )
        .unwrap();

        let parse = read_dump_file(&path).unwrap();
        assert_eq!(parse.records.len(), 1);
        assert_eq!(discover_columns(&path).unwrap(), vec!["id", "city_name"]);

        let missing = read_dump_file(&dir.path().join("missing.sql")).unwrap();
        assert!(missing.records.is_empty());
        assert!(discover_columns(&dir.path().join("missing.sql")).unwrap().is_empty());
    }
}
