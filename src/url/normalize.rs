use crate::UrlError;
use url::form_urlencoded;
use url::Url;

/// Query parameters that only carry tracking data
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid"];

/// Resolves a raw reference and brings it into canonical form
///
/// # Normalization Steps
///
/// 1. Resolve against `base` (when given); reject malformed results
/// 2. Require an `http` or `https` scheme and a host
/// 3. Scheme and host are lower-cased and default ports dropped by the parser
/// 4. Normalize path:
///    - Remove dot segments and repeated slashes
///    - Decode escapes of unreserved characters, upper-case all other escapes
///    - Remove trailing slash (except for root /)
/// 5. Remove fragment
/// 6. Remove tracking query parameters, sort the rest by key
/// 7. Remove empty query string
///
/// # Examples
///
/// ```
/// use pagepull::url::canonicalize;
///
/// let url = canonicalize("https://EX.com/a/#frag", None).unwrap();
/// assert_eq!(url.as_str(), "https://ex.com/a");
/// ```
pub fn canonicalize(raw: &str, base: Option<&Url>) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
    .map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;

    normalize_url(parsed)
}

/// Brings an already-absolute URL into canonical form
pub fn normalize_url(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params)
                .finish();
            url.set_query(Some(&query));
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<String> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(normalize_escapes(segment)),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

/// Decodes percent-escapes of unreserved characters and upper-cases the rest
fn normalize_escapes(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = String::with_capacity(segment.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = hi * 16 + lo;
                if is_unreserved(decoded) {
                    out.push(decoded as char);
                } else {
                    out.push('%');
                    out.push(bytes[i + 1].to_ascii_uppercase() as char);
                    out.push(bytes[i + 2].to_ascii_uppercase() as char);
                }
                i += 3;
                continue;
            }
        }

        // Multi-byte characters are copied whole
        let ch = segment[i..].chars().next().unwrap_or('%');
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    // Stable: repeated keys keep their relative order
    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> String {
        canonicalize(raw, None).unwrap().to_string()
    }

    #[test]
    fn test_canonical_equivalence() {
        let a = canon("https://EX.com/a");
        let b = canon("https://ex.com/a/");
        let c = canon("https://ex.com/a#frag");
        assert_eq!(a, "https://ex.com/a");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_keep_scheme() {
        assert_eq!(canon("http://example.com/page"), "http://example.com/page");
    }

    #[test]
    fn test_keep_www() {
        assert_eq!(canon("https://www.example.com/"), "https://www.example.com/");
    }

    #[test]
    fn test_keep_root_slash() {
        assert_eq!(canon("https://example.com/"), "https://example.com/");
        assert_eq!(canon("https://example.com"), "https://example.com/");
    }

    #[test]
    fn test_default_port_removed() {
        assert_eq!(canon("https://example.com:443/x"), "https://example.com/x");
        assert_eq!(canon("http://example.com:80/x"), "http://example.com/x");
        assert_eq!(canon("http://example.com:8080/x"), "http://example.com:8080/x");
    }

    #[test]
    fn test_remove_tracking_params() {
        assert_eq!(
            canon("https://example.com/page?utm_source=twitter&fbclid=1"),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_sort_query_params() {
        assert_eq!(
            canon("https://example.com/page?b=2&a=1"),
            "https://example.com/page?a=1&b=2"
        );
    }

    #[test]
    fn test_repeated_keys_keep_order() {
        assert_eq!(
            canon("https://example.com/p?z=1&a=2&a=1"),
            "https://example.com/p?a=2&a=1&z=1"
        );
    }

    #[test]
    fn test_normalize_path_with_dots() {
        assert_eq!(canon("https://example.com/a/../b/./c"), "https://example.com/b/c");
    }

    #[test]
    fn test_multiple_slashes() {
        assert_eq!(
            canon("https://example.com///path//to///page"),
            "https://example.com/path/to/page"
        );
    }

    #[test]
    fn test_percent_escape_normalization() {
        assert_eq!(canon("https://example.com/%7Euser"), "https://example.com/~user");
        assert_eq!(canon("https://example.com/a%2fb"), "https://example.com/a%2Fb");
        assert_eq!(canon("https://example.com/caf%c3%a9"), "https://example.com/caf%C3%A9");
    }

    #[test]
    fn test_resolve_relative_against_base() {
        let base = Url::parse("https://example.com/docs/intro/").unwrap();
        assert_eq!(
            canonicalize("../img/logo.png", Some(&base)).unwrap().as_str(),
            "https://example.com/docs/img/logo.png"
        );
        assert_eq!(
            canonicalize("//cdn.example.net/lib.js", Some(&base)).unwrap().as_str(),
            "https://cdn.example.net/lib.js"
        );
    }

    #[test]
    fn test_invalid_scheme() {
        for raw in ["mailto:a@example.com", "javascript:void(0)", "data:text/plain,hi"] {
            assert!(matches!(
                canonicalize(raw, None),
                Err(UrlError::InvalidScheme(_))
            ));
        }
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(canonicalize("not a url", None), Err(UrlError::Parse(_))));
        assert!(matches!(canonicalize("   ", None), Err(UrlError::Empty)));
    }
}
