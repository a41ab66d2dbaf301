//! Text decoding for dump files
//!
//! Dumps come from a mix of tools: UTF-8, UTF-8 with BOM and GBK are all seen
//! in practice. Decoding never fails; the last resort is lossy UTF-8.

use anyhow::{Context, Result};
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode raw dump bytes, trying UTF-8, then GBK, then lossy UTF-8
pub fn decode_dump(bytes: &[u8]) -> String {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    if let Ok(text) = std::str::from_utf8(body) {
        return text.to_string();
    }

    if let Some(text) = encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(body) {
        log::debug!("Dump decoded as GBK ({} bytes)", body.len());
        return text.into_owned();
    }

    log::warn!("Dump is neither UTF-8 nor GBK; decoding lossily");
    String::from_utf8_lossy(body).into_owned()
}

/// Read and decode a dump file. A missing file yields `None`.
pub fn read_dump_text(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read dump file: {}", path.display()))?;
    Ok(Some(decode_dump(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_with_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("insert".as_bytes());
        assert_eq!(decode_dump(&bytes), "insert");
    }

    #[test]
    fn test_decode_gbk() {
        // "基金" in GBK
        let bytes = [0xBB, 0xF9, 0xBD, 0xF0];
        assert_eq!(decode_dump(&bytes), "基金");
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_dump_text(&dir.path().join("nope.sql")).unwrap();
        assert!(result.is_none());
    }
}
