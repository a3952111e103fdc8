//! Deterministic local paths for canonical URLs
//!
//! Local paths are relative to the output root and always `/`-separated, so
//! they can be stored in the manifest and turned into relative references
//! without caring about the host platform.

use crate::filter::{path_extension, AssetKind};
use crate::manifest::sha256_hex;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// Directory holding resources from hosts other than the seed host
pub const HOSTS_DIR: &str = "_hosts";

/// Names at the output root that mirrored files may not take
const RESERVED: [&str; 4] = [HOSTS_DIR, ".pagepull", "_sitemap.html", "_summary.txt"];

const MAX_SEGMENT_LEN: usize = 200;

/// Maps a canonical URL to its local path
///
/// # Rules
///
/// - the authority of `root` (the seed, or where the seed redirected to) maps
///   to the output root, any other host to `_hosts/<host>/`
/// - `/` becomes `index.html`
/// - a final segment without an extension gains one from the kind
///   (`.html` for pages) or the content type
/// - a query string adds `_<8 hex digits of its SHA-256>` before the extension
/// - segments are percent-decoded and filesystem-hostile characters replaced
///
/// # Example
///
/// ```
/// use pagepull::rewrite::local_path_for;
/// use pagepull::AssetKind;
/// use url::Url;
///
/// let seed = Url::parse("https://example.com/").unwrap();
/// let url = Url::parse("https://example.com/docs/intro").unwrap();
/// assert_eq!(local_path_for(&url, AssetKind::Html, None, &seed), "docs/intro.html");
/// ```
pub fn local_path_for(url: &Url, kind: AssetKind, content_type: Option<&str>, root: &Url) -> String {
    let mut segments: Vec<String> = Vec::new();

    if !same_authority(url, root) {
        segments.push(HOSTS_DIR.to_string());
        segments.push(sanitize_segment(&authority_dir(url)));
    }

    let path_segments: Vec<String> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| sanitize_segment(&percent_decode(s)))
        .collect();
    let on_root = segments.is_empty();
    segments.extend(path_segments);

    let mut file = if segments.len() == usize::from(!on_root) * 2 {
        "index.html".to_string()
    } else {
        segments.pop().unwrap_or_default()
    };

    if on_root && segments.is_empty() && RESERVED.contains(&file.as_str()) {
        file.insert(0, '_');
    }
    if let Some(first) = segments.first_mut().filter(|_| on_root) {
        if RESERVED.contains(&first.as_str()) {
            first.insert(0, '_');
        }
    }

    let (stem, ext) = match path_extension(&file) {
        Some(ext) => {
            let stem_len = file.len() - ext.len() - 1;
            (file[..stem_len].to_string(), Some(ext.to_string()))
        }
        None => (
            file.clone(),
            kind.default_extension(content_type).map(str::to_string),
        ),
    };

    let mut name = stem;
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        name.push('_');
        name.push_str(&sha256_hex(query.as_bytes())[..8]);
    }
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(&ext);
    }

    segments.push(name);
    segments.join("/")
}

/// Relative reference from the file at `from` to the file at `to`
///
/// Both arguments are root-relative local paths. The result is percent-encoded
/// for use inside an HTML attribute or a CSS `url()`.
pub fn relative_path(from: &str, to: &str) -> String {
    let from_dirs: Vec<&str> = {
        let mut parts: Vec<&str> = from.split('/').collect();
        parts.pop();
        parts
    };
    let to_parts: Vec<&str> = to.split('/').collect();
    let (to_dirs, to_file) = to_parts.split_at(to_parts.len().saturating_sub(1));

    let common = from_dirs
        .iter()
        .zip(to_dirs.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::new();
    parts.extend(std::iter::repeat("..").take(from_dirs.len() - common));
    parts.extend(to_dirs[common..].iter().copied());
    parts.extend(to_file.iter().copied());

    encode_reference(&parts.join("/"))
}

/// Registry of local paths claimed during a run
///
/// Two distinct URLs can map to the same local path (for instance when they
/// differ only in letter case on a case-insensitive filesystem). The first
/// claimant keeps the path; later ones get a `~N` suffix.
#[derive(Debug, Default)]
pub struct PathClaims {
    inner: Mutex<ClaimsInner>,
}

#[derive(Debug, Default)]
struct ClaimsInner {
    /// Lower-cased path -> owning URL
    by_path: HashMap<String, String>,
    /// URL -> claimed path
    by_url: HashMap<String, String>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a path recorded by a previous run
    pub fn seed(&self, url: &str, path: &str) {
        let mut inner = self.lock();
        let key = path.to_ascii_lowercase();
        if inner.by_path.get(&key).is_some_and(|owner| owner != url) {
            return;
        }
        inner.by_path.insert(key, url.to_string());
        inner.by_url.insert(url.to_string(), path.to_string());
    }

    /// Claims a path for `url`, preferring `preferred`
    ///
    /// A URL that already holds a claim keeps it, so local paths stay stable
    /// across runs.
    pub fn claim(&self, url: &str, preferred: &str) -> String {
        let mut inner = self.lock();
        if let Some(existing) = inner.by_url.get(url) {
            return existing.clone();
        }

        let mut candidate = preferred.to_string();
        let mut n = 2;
        while inner
            .by_path
            .get(&candidate.to_ascii_lowercase())
            .is_some_and(|owner| owner != url)
        {
            candidate = with_suffix(preferred, n);
            n += 1;
        }

        inner
            .by_path
            .insert(candidate.to_ascii_lowercase(), url.to_string());
        inner.by_url.insert(url.to_string(), candidate.clone());
        candidate
    }

    /// Path claimed by `url`, if any
    pub fn path_of(&self, url: &str) -> Option<String> {
        self.lock().by_url.get(url).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClaimsInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn with_suffix(path: &str, n: u32) -> String {
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let file = match path_extension(file) {
        Some(ext) => {
            let stem = &file[..file.len() - ext.len() - 1];
            format!("{}~{}.{}", stem, n, ext)
        }
        None => format!("{}~{}", file, n),
    };
    match dir {
        Some(dir) => format!("{}/{}", dir, file),
        None => file,
    }
}

fn same_authority(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

fn authority_dir(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host.to_string(),
    }
}

fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn sanitize_segment(segment: &str) -> String {
    let mut clean: String = segment
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if clean == "." || clean == ".." {
        clean = clean.replace('.', "_");
    }
    if clean.len() > MAX_SEGMENT_LEN {
        let mut end = MAX_SEGMENT_LEN;
        while !clean.is_char_boundary(end) {
            end -= 1;
        }
        clean.truncate(end);
    }
    clean
}

fn encode_reference(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'.'
            | b'_'
            | b'~'
            | b'/'
            | b'!'
            | b'$'
            | b'&'
            | b'+'
            | b','
            | b';'
            | b'='
            | b'@' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
