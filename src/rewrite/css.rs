//! `url()` and `@import` substitution in stylesheets

use crate::crawler::{css_url_regex, css_url_value, import_regex};
use crate::rewrite::Replacements;
use encoding_rs::Encoding;
use regex::Captures;

/// Rewrites a stored stylesheet, reading and writing it in `encoding`
///
/// A byte order mark is kept as is. A stylesheet with nothing to substitute,
/// or one in an encoding that cannot be written back, is returned unchanged.
pub fn rewrite_stylesheet(
    css: &[u8],
    encoding: &'static Encoding,
    replacements: &Replacements,
) -> (Vec<u8>, usize) {
    if encoding.output_encoding() != encoding {
        return (css.to_vec(), 0);
    }
    let bom_len = Encoding::for_bom(css).map_or(0, |(_, len)| len);
    let (bom, body) = css.split_at(bom_len);

    let (text, _) = encoding.decode_without_bom_handling(body);
    let (rewritten, count) = rewrite_css(&text, replacements);
    if count == 0 {
        return (css.to_vec(), 0);
    }

    let (encoded, _, _) = encoding.encode(&rewritten);
    let mut out = Vec::with_capacity(bom.len() + encoded.len());
    out.extend_from_slice(bom);
    out.extend_from_slice(&encoded);
    (out, count)
}

/// Rewrites every reference in `css` that has a replacement
///
/// Returns the new text and the number of substituted references.
pub fn rewrite_css(css: &str, replacements: &Replacements) -> (String, usize) {
    let (Some(import_re), Some(url_re)) = (import_regex(), css_url_regex()) else {
        return (css.to_string(), 0);
    };
    let mut count = 0;

    let imported = import_re.replace_all(css, |caps: &Captures<'_>| {
        let raw = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        match replacements.get(raw) {
            Some(new) => {
                count += 1;
                format!("@import \"{}\"", new)
            }
            None => caps[0].to_string(),
        }
    });

    let rewritten = url_re.replace_all(&imported, |caps: &Captures<'_>| {
        match css_url_value(caps).and_then(|raw| replacements.get(raw)) {
            Some(new) => {
                count += 1;
                css_url(new)
            }
            None => caps[0].to_string(),
        }
    });

    (rewritten.into_owned(), count)
}

/// `url()` token for a replacement, quoted only when the value needs it
fn css_url(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | '\\'));
    if needs_quotes {
        format!("url(\"{}\")", value.replace('"', "%22"))
    } else {
        format!("url({})", value)
    }
}
