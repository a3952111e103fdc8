use std::net::IpAddr;
use url::Url;

/// Second-level labels that sit under a two-letter country TLD as a public suffix
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

/// Extracts the lower-cased host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use pagepull::url::extract_domain;
///
/// let url = Url::parse("https://Blog.Example.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the origin of a URL as `scheme://host[:port]`
///
/// Default ports are omitted, so the origin of two URLs that differ only in an
/// explicit default port is identical.
pub fn origin_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Computes the registrable domain of a host
///
/// Uses the last two labels, or the last three when the host ends in a common
/// second-level suffix such as `co.uk` or `com.au`. IP addresses and single-label
/// hosts are returned unchanged.
///
/// # Arguments
///
/// * `host` - A host name, as returned by [`Url::host_str`]
///
/// # Returns
///
/// The lower-cased registrable domain
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();

    if host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let tld = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let keep = if tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(&second) {
        3
    } else {
        2
    };

    labels[labels.len() - keep..].join(".")
}

/// Checks whether `host` belongs to the given registrable domain
pub fn host_in_domain(host: &str, registrable: &str) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();
    host == registrable || host.ends_with(&format!(".{}", registrable))
}
