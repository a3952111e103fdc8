//! Rewrite pass: turns captured references into relative local paths
//!
//! Runs once per run, strictly after the frontier has drained. Every stored
//! HTML or CSS document is re-rendered from its pristine body, so the pass can
//! run again after 304 responses or filter changes and always converges to the
//! same output.

mod charset;
mod css;
mod html;
mod paths;

pub use charset::{decode_body, document_encoding};
pub use css::{rewrite_css, rewrite_stylesheet};
pub use html::rewrite_html;
pub use paths::{local_path_for, relative_path, PathClaims, HOSTS_DIR};

use crate::filter::AssetKind;
use crate::manifest::{read_optional, write_atomic, ObjectStore, ResourceRecord};
use crate::url::canonicalize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw reference -> substitution for one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    map: HashMap<String, String>,
}

impl Replacements {
    pub fn insert(&mut self, raw: impl Into<String>, replacement: impl Into<String>) {
        self.map.insert(raw.into(), replacement.into());
    }

    /// Substitution for a raw reference, compared after trimming whitespace
    pub fn get(&self, raw: &str) -> Option<&str> {
        self.map.get(raw.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Canonical URL -> local path of every resource with a stored file
#[derive(Debug, Clone, Default)]
pub struct RewriteMap {
    paths: HashMap<String, String>,
}

impl RewriteMap {
    /// Builds the map from `fetched` and `cached-unchanged` records
    ///
    /// A record that was reached through a redirect also answers for the
    /// canonical form of its final URL, unless another record owns that URL.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ResourceRecord>) -> Self {
        let stored: Vec<(&ResourceRecord, &str)> = records
            .into_iter()
            .filter(|r| r.status.is_success())
            .filter_map(|r| Some((r, r.local_path.as_deref()?)))
            .collect();

        let mut paths: HashMap<String, String> = stored
            .iter()
            .map(|(r, path)| (r.url.clone(), path.to_string()))
            .collect();
        for (record, path) in &stored {
            let Some(alias) = record
                .final_url
                .as_deref()
                .and_then(|u| canonicalize(u, None).ok())
            else {
                continue;
            };
            paths
                .entry(alias.to_string())
                .or_insert_with(|| path.to_string());
        }
        Self { paths }
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.paths.get(url).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Substitutions for the references of the document at `from`
    ///
    /// A reference to a mirrored resource becomes a relative path; any other
    /// reference with a known target becomes that absolute URL, so it still
    /// works online. The raw fragment is carried over in both cases.
    pub fn replacements_for(&self, from: &str, record: &ResourceRecord) -> Replacements {
        let mut replacements = Replacements::default();
        for link in &record.references {
            let Some(target) = link.target.as_deref() else {
                continue;
            };
            let fragment = link
                .raw
                .find('#')
                .map_or("", |i| &link.raw[i..]);

            let mut value = match self.get(target) {
                Some(to) => relative_path(from, to),
                None => target.to_string(),
            };
            value.push_str(fragment);

            if value != link.raw {
                replacements.insert(link.raw.clone(), value);
            }
        }
        replacements
    }
}

/// Outcome of a rewrite pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// HTML and CSS documents examined
    pub documents: usize,
    /// Documents whose bytes on disk changed
    pub files_written: usize,
    /// References substituted
    pub references: usize,
    /// Documents skipped because their pristine body is missing
    pub missing_bodies: usize,
}

/// Rewrites every stored HTML and CSS document
///
/// A document is written only when its rewritten bytes differ from what is on
/// disk. Failure to rewrite one document is logged and does not stop the pass.
pub async fn run(root: &Path, records: &[ResourceRecord], objects: &ObjectStore) -> RewriteReport {
    let map = RewriteMap::from_records(records);
    let mut report = RewriteReport::default();
    info!("Rewriting references using {} mirrored resources", map.len());

    for record in records
        .iter()
        .filter(|r| r.status.is_success() && r.kind.has_references())
    {
        let (Some(local), Some(hash)) = (record.local_path.as_deref(), record.content_hash.as_deref())
        else {
            continue;
        };
        report.documents += 1;

        let pristine = match objects.get(hash).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!("Pristine body for {} is missing; leaving {} as is", record.url, local);
                report.missing_bodies += 1;
                continue;
            }
            Err(e) => {
                warn!("Cannot read pristine body for {}: {}", record.url, e);
                report.missing_bodies += 1;
                continue;
            }
        };

        let replacements = map.replacements_for(local, record);
        let encoding = document_encoding(record.content_type.as_deref(), &pristine);
        let (bytes, count) = match record.kind {
            AssetKind::Html if !encoding.is_ascii_compatible() => {
                warn!("Cannot rewrite {}: {} is not supported", local, encoding.name());
                continue;
            }
            AssetKind::Html => match rewrite_html(&pristine, encoding, &replacements) {
                Ok(result) => result,
                Err(e) => {
                    warn!("Cannot rewrite {}: {}", local, e);
                    continue;
                }
            },
            _ => rewrite_stylesheet(&pristine, encoding, &replacements),
        };
        report.references += count;

        let file = root.join(local);
        match write_if_changed(&file, &bytes).await {
            Ok(true) => {
                debug!("Rewrote {} ({} references)", local, count);
                report.files_written += 1;
            }
            Ok(false) => {}
            Err(e) => warn!("Cannot write {}: {}", file.display(), e),
        }
    }

    info!(
        "Rewrite pass: {} documents, {} references, {} files written",
        report.documents, report.references, report.files_written
    );
    report
}

/// Writes `bytes` unless the file already holds exactly them
pub async fn write_if_changed(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    if read_optional(path).await?.as_deref() == Some(bytes) {
        return Ok(false);
    }
    write_atomic(path, bytes).await?;
    Ok(true)
}

/// Deletes files left behind by resources that no longer have a stored copy
///
/// `previous` maps canonical URLs to the local paths they held when the run
/// started. A path is removed when its URL is no longer a success in `records`
/// and no successful record claims the same path. Returns the paths removed.
pub async fn prune_stale_files(
    root: &Path,
    previous: &HashMap<String, String>,
    records: &[ResourceRecord],
) -> Vec<String> {
    let live: HashSet<&str> = records
        .iter()
        .filter(|r| r.status.is_success())
        .filter_map(|r| r.local_path.as_deref())
        .collect();
    let still_success: HashSet<&str> = records
        .iter()
        .filter(|r| r.status.is_success())
        .map(|r| r.url.as_str())
        .collect();

    let mut removed = Vec::new();
    for (url, path) in previous {
        if still_success.contains(url.as_str()) || live.contains(path.as_str()) {
            continue;
        }
        match tokio::fs::remove_file(root.join(path)).await {
            Ok(()) => {
                debug!("Removed stale file {} for {}", path, url);
                removed.push(path.clone());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot remove stale file {}: {}", path, e),
        }
    }
    removed.sort();
    removed
}

/// Deletes pristine bodies no successful record refers to
pub async fn prune_objects(objects: &ObjectStore, records: &[ResourceRecord]) -> usize {
    let keep: HashSet<String> = records
        .iter()
        .filter(|r| r.status.is_success() && r.kind.has_references())
        .filter_map(|r| r.content_hash.clone())
        .collect();
    match objects.prune(&keep).await {
        Ok(removed) => removed,
        Err(e) => {
            warn!("Cannot prune stored bodies: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{sha256_hex, LinkRef, RecordStatus};
    use tempfile::TempDir;

    fn record(url: &str, kind: AssetKind, path: &str) -> ResourceRecord {
        let mut record = ResourceRecord::new(url, kind, RecordStatus::Fetched);
        record.local_path = Some(path.to_string());
        record
    }

    fn link(raw: &str, target: Option<&str>) -> LinkRef {
        LinkRef {
            raw: raw.to_string(),
            target: target.map(str::to_string),
            page: true,
            hint: None,
        }
    }

    #[test]
    fn test_replacements_for() {
        let mut page = record("https://example.com/blog/post", AssetKind::Html, "blog/post.html");
        page.references = vec![
            link("/about#team", Some("https://example.com/about")),
            link("../missing", Some("https://example.com/missing")),
            link("https://other.org/", Some("https://other.org/")),
            link("mailto:x", None),
        ];
        let about = record("https://example.com/about", AssetKind::Html, "about.html");
        let map = RewriteMap::from_records([&page, &about]);

        let replacements = map.replacements_for("blog/post.html", &page);
        assert_eq!(replacements.get("/about#team"), Some("../about.html#team"));
        assert_eq!(replacements.get("../missing"), Some("https://example.com/missing"));
        assert_eq!(replacements.get("https://other.org/"), None);
        assert_eq!(replacements.get("mailto:x"), None);
    }

    #[test]
    fn test_map_only_holds_successes() {
        let mut failed = record("https://example.com/x", AssetKind::Html, "x.html");
        failed.status = RecordStatus::Failed;
        let ok = record("https://example.com/y", AssetKind::Html, "y.html");
        let map = RewriteMap::from_records([&failed, &ok]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("https://example.com/y"), Some("y.html"));
    }

    #[test]
    fn test_redirect_target_maps_to_fetching_record() {
        let mut home = record("http://example.com/", AssetKind::Html, "index.html");
        home.final_url = Some("https://www.example.com/".to_string());
        let mut moved = record("https://www.example.com/old", AssetKind::Html, "old.html");
        moved.final_url = Some("https://www.example.com/b".to_string());
        let b = record("https://www.example.com/b", AssetKind::Html, "b.html");

        let map = RewriteMap::from_records([&home, &moved, &b]);
        assert_eq!(map.get("https://www.example.com/"), Some("index.html"));
        assert_eq!(map.get("https://www.example.com/b"), Some("b.html"));
        assert_eq!(map.len(), 4);
    }

    #[tokio::test]
    async fn test_run_rewrites_from_pristine_body() {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().join(".pagepull/objects"));

        let body = br#"<a href="/about">About</a><img src="img/a.png">"#;
        let hash = sha256_hex(body);
        objects.put(&hash, body).await.unwrap();
        tokio::fs::write(dir.path().join("index.html"), body).await.unwrap();

        let mut index = record("https://example.com/", AssetKind::Html, "index.html");
        index.content_hash = Some(hash);
        index.references = vec![
            link("/about", Some("https://example.com/about")),
            link("img/a.png", Some("https://example.com/img/a.png")),
        ];
        let about = record("https://example.com/about", AssetKind::Html, "about.html");
        let image = record("https://example.com/img/a.png", AssetKind::Image, "img/a.png");
        let records = vec![index, about, image];

        let report = run(dir.path(), &records, &objects).await;
        assert_eq!(report.documents, 1);
        assert_eq!(report.references, 1);
        assert_eq!(report.files_written, 1);

        let written = tokio::fs::read_to_string(dir.path().join("index.html")).await.unwrap();
        assert_eq!(written, r#"<a href="about.html">About</a><img src="img/a.png">"#);

        // A second pass finds nothing to change
        let report = run(dir.path(), &records, &objects).await;
        assert_eq!(report.files_written, 0);
    }

    #[tokio::test]
    async fn test_run_keeps_latin1_bytes() {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().join(".pagepull/objects"));

        let body = b"<meta charset=\"iso-8859-1\"><p>caf\xE9</p><a href=\"/b\">b</a>";
        let hash = sha256_hex(body);
        objects.put(&hash, body).await.unwrap();

        let mut index = record("https://example.com/", AssetKind::Html, "index.html");
        index.content_hash = Some(hash);
        index.content_type = Some("text/html".to_string());
        index.references = vec![link("/b", Some("https://example.com/b"))];
        let b = record("https://example.com/b", AssetKind::Html, "b.html");

        let report = run(dir.path(), &[index, b], &objects).await;
        assert_eq!(report.references, 1);

        let written = tokio::fs::read(dir.path().join("index.html")).await.unwrap();
        assert_eq!(
            written,
            b"<meta charset=\"iso-8859-1\"><p>caf\xE9</p><a href=\"b.html\">b</a>".to_vec()
        );
    }

    #[tokio::test]
    async fn test_prune_stale_files() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("img")).await.unwrap();
        tokio::fs::write(dir.path().join("img/big.png"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("keep.html"), b"y").await.unwrap();

        let mut big = ResourceRecord::new("https://example.com/img/big.png", AssetKind::Image, RecordStatus::SkippedFilter);
        big.local_path = None;
        let keep = record("https://example.com/keep", AssetKind::Html, "keep.html");

        let previous = HashMap::from([
            ("https://example.com/img/big.png".to_string(), "img/big.png".to_string()),
            ("https://example.com/keep".to_string(), "keep.html".to_string()),
        ]);
        let removed = prune_stale_files(dir.path(), &previous, &[big, keep]).await;

        assert_eq!(removed, vec!["img/big.png".to_string()]);
        assert!(!dir.path().join("img/big.png").exists());
        assert!(dir.path().join("keep.html").exists());
    }
}
