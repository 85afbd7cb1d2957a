//! Reads column headers out of delimited files so they can be clustered.

use std::path::Path;

use anyhow::{bail, Context};
use encoding_rs::WINDOWS_1251;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CP1251_UNDEFINED: u8 = 0x98;

/// Decode raw file bytes, trying candidate encodings in order:
/// UTF-8 (BOM stripped), Windows-1251, then ISO-8859-1.
///
/// ISO-8859-1 maps every byte to a code point, so decoding never fails.
/// Returns the decoded text and the name of the encoding that worked.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), "utf-8");
    }

    // encoding_rs maps 0x98 to U+0098, strict cp1251 leaves it undefined
    if !bytes.contains(&CP1251_UNDEFINED) {
        if let Some(text) = WINDOWS_1251.decode_without_bom_handling_and_without_replacement(bytes)
        {
            return (text.into_owned(), "windows-1251");
        }
    }

    (
        encoding_rs::mem::decode_latin1(bytes).into_owned(),
        "iso-8859-1",
    )
}

/// Return the trimmed, non-blank cells of the first row of `path`.
pub fn read_header_row(path: &Path, delimiter: u8) -> anyhow::Result<Vec<String>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (text, encoding) = decode_text(&bytes);
    log::info!("read {} with encoding {encoding}", path.display());

    parse_header_row(&text, delimiter).with_context(|| format!("in {}", path.display()))
}

fn parse_header_row(text: &str, delimiter: u8) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(str::trim)
        .filter(|header| !header.is_empty())
        .map(str::to_string)
        .collect();

    if headers.is_empty() {
        bail!("no column headers found");
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_strips_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("цена;price".as_bytes());
        let (text, encoding) = decode_text(&bytes);
        assert_eq!(text, "цена;price");
        assert_eq!(encoding, "utf-8");
    }

    #[test]
    fn test_decode_windows_1251() {
        // "цена;вес" in Windows-1251
        let bytes = [0xF6, 0xE5, 0xED, 0xE0, b';', 0xE2, 0xE5, 0xF1];
        let (text, encoding) = decode_text(&bytes);
        assert_eq!(text, "цена;вес");
        assert_eq!(encoding, "windows-1251");
    }

    #[test]
    fn test_decode_falls_back_to_latin1() {
        // 0x98 has no Windows-1251 mapping
        let (text, encoding) = decode_text(&[0x63, 0x61, 0x66, 0xE9, 0x98]);
        assert_eq!(text, "caf\u{e9}\u{98}");
        assert_eq!(encoding, "iso-8859-1");
    }

    #[test]
    fn test_read_windows_1251_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("table.csv");
        let (bytes, _, had_errors) = WINDOWS_1251.encode("id сте;название сте;цена\n1;Стол;100\n");
        assert!(!had_errors);
        std::fs::write(&path, &bytes).unwrap();

        let headers = read_header_row(&path, b';').unwrap();
        assert_eq!(headers, vec!["id сте", "название сте", "цена"]);
    }

    #[test]
    fn test_read_semicolon_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("table.csv");
        std::fs::write(
            &path,
            "id сте; название сте ;;модель\n1;Стол;;X-1\n2;Стул;;Y-2\n",
        )
        .unwrap();

        let headers = read_header_row(&path, b';').unwrap();
        assert_eq!(headers, vec!["id сте", "название сте", "модель"]);
    }

    #[test]
    fn test_quoted_headers_keep_delimiters() {
        let headers = parse_header_row("\"price, net\",cost\n", b',').unwrap();
        assert_eq!(headers, vec!["price, net", "cost"]);
    }

    #[test]
    fn test_empty_file_is_an_error() {
        assert!(parse_header_row("", b';').is_err());
        assert!(parse_header_row(";;\n", b';').is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_header_row(&tmp.path().join("nope.csv"), b';').is_err());
    }
}
