//! Character encoding of stored documents
//!
//! References are ASCII in practice, but the text around them is not. Both the
//! extractor and the rewrite pass decode with the document's own encoding, and
//! the rewrite pass encodes back into it, so non-UTF-8 pages survive a rewrite
//! byte for byte.

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use std::sync::OnceLock;

/// Bytes scanned for a `<meta charset>` or `@charset` declaration
const SNIFF_LEN: usize = 1024;

/// Encoding of a document
///
/// Precedence: byte order mark, the `charset` parameter of the Content-Type,
/// an in-document declaration near the start of the body, then UTF-8.
pub fn document_encoding(content_type: Option<&str>, body: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }
    content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| declared_charset(body))
        .unwrap_or(UTF_8)
}

/// Decodes a body, replacing malformed sequences
pub fn decode_body<'a>(body: &'a [u8], encoding: &'static Encoding) -> std::borrow::Cow<'a, str> {
    let (text, _, _) = encoding.decode(body);
    text
}

/// `charset` parameter of a Content-Type value
fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(&['"', '\''][..]))
            .filter(|v| !v.is_empty())
    })
}

fn declared_charset(body: &[u8]) -> Option<&'static Encoding> {
    static DECLARATION: OnceLock<Option<Regex>> = OnceLock::new();
    let re = DECLARATION
        .get_or_init(|| {
            Regex::new(r#"(?i-u)(?:<meta[^>]*?charset|@charset)\s*=?\s*["']?\s*([a-z0-9_:.\-]+)"#).ok()
        })
        .as_ref()?;

    let head = &body[..body.len().min(SNIFF_LEN)];
    let label = re.captures(head)?.get(1)?.as_bytes();
    let encoding = Encoding::for_label(label)?;
    // A page cannot declare itself UTF-16 from inside an ASCII-compatible byte stream
    Some(if encoding.is_ascii_compatible() { encoding } else { UTF_8 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, UTF_16LE, WINDOWS_1252};

    #[test]
    fn test_content_type_wins() {
        let body = br#"<meta charset="shift_jis">"#;
        assert_eq!(document_encoding(Some("text/html; charset=ISO-8859-1"), body), WINDOWS_1252);
        assert_eq!(document_encoding(Some("text/html"), body), SHIFT_JIS);
    }

    #[test]
    fn test_declared_charset() {
        let html = b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=latin1\">";
        assert_eq!(document_encoding(None, html), WINDOWS_1252);

        let css = b"@charset \"iso-8859-1\";\nbody { }";
        assert_eq!(document_encoding(Some("text/css"), css), WINDOWS_1252);

        assert_eq!(document_encoding(None, b"<p>plain</p>"), UTF_8);
        assert_eq!(document_encoding(None, br#"<meta charset="utf-16">"#), UTF_8);
    }

    #[test]
    fn test_byte_order_mark() {
        assert_eq!(document_encoding(Some("text/html; charset=latin1"), b"\xFF\xFE<\0"), UTF_16LE);
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(b"caf\xE9", WINDOWS_1252), "café");
        assert_eq!(decode_body(b"caf\xE9", UTF_8), "caf\u{FFFD}");
    }

    #[test]
    fn test_charset_param() {
        assert_eq!(charset_param("text/css; charset=\"UTF-8\""), Some("UTF-8"));
        assert_eq!(charset_param("text/css"), None);
        assert_eq!(charset_param("text/css; charset="), None);
    }
}
