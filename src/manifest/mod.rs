//! State Manifest
//!
//! The durable map from canonical URL to [`ResourceRecord`] for one output
//! directory. It is loaded at run start, updated by workers through
//! [`Manifest::commit`], and persisted as pretty JSON via write-temp-then-rename
//! so an interrupted run leaves the last fully committed state on disk.

mod record;
mod store;

pub use record::{HttpExchange, LinkRef, RecordStatus, ResourceRecord};
pub use store::{read_optional, sha256_hex, write_atomic, ObjectStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Schema version written to `manifest.json`
pub const MANIFEST_VERSION: u32 = 1;

/// Number of commits between automatic flushes
pub const FLUSH_EVERY: usize = 25;

/// Directory under the output root holding engine state
pub const STATE_DIR: &str = ".pagepull";

/// Manifest persistence errors
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest IO error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// `<root>/.pagepull`
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// `<root>/.pagepull/manifest.json`
pub fn manifest_path(root: &Path) -> PathBuf {
    state_dir(root).join("manifest.json")
}

/// `<root>/.pagepull/objects`
pub fn objects_dir(root: &Path) -> PathBuf {
    state_dir(root).join("objects")
}

/// On-disk shape of the manifest, records decoded one by one
#[derive(Debug, Deserialize)]
struct ManifestFile {
    version: u32,
    #[serde(default)]
    filter_fingerprint: Option<String>,
    #[serde(default)]
    records: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct ManifestFileRef<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    filter_fingerprint: Option<&'a str>,
    records: &'a BTreeMap<String, ResourceRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, ResourceRecord>,
    /// URLs committed during this run
    touched: HashSet<String>,
    /// Commits since the last flush
    pending: usize,
    filter_fingerprint: Option<String>,
}

/// Concurrency-safe manifest with serialized commits
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Manifest {
    /// Creates an empty manifest for the output root without reading the disk
    pub fn empty(root: &Path) -> Self {
        Self {
            path: manifest_path(root),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Loads the manifest for the output root
    ///
    /// A missing file yields an empty manifest. An unreadable file or an unknown
    /// schema version is reported with a warning, moved aside to
    /// `manifest.json.corrupt`, and replaced by an empty manifest. Individual
    /// records that fail to decode are dropped.
    pub async fn open(root: &Path) -> Result<Self, ManifestError> {
        let manifest = Self::empty(root);

        let bytes = match read_optional(&manifest.path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No manifest at {}, starting fresh", manifest.path.display());
                return Ok(manifest);
            }
            Err(source) => {
                return Err(ManifestError::Io {
                    path: manifest.path.clone(),
                    source,
                })
            }
        };

        let file: ManifestFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Manifest at {} is unreadable ({}); starting with an empty manifest",
                    manifest.path.display(),
                    e
                );
                manifest.set_aside().await;
                return Ok(manifest);
            }
        };

        if file.version != MANIFEST_VERSION {
            warn!(
                "Manifest at {} has unsupported version {}; starting with an empty manifest",
                manifest.path.display(),
                file.version
            );
            manifest.set_aside().await;
            return Ok(manifest);
        }

        let mut records = BTreeMap::new();
        for (key, value) in file.records {
            match serde_json::from_value::<ResourceRecord>(value) {
                Ok(record) if record.url == key => {
                    records.insert(key, record);
                }
                Ok(_) => warn!("Dropping manifest record with mismatched key {}", key),
                Err(e) => warn!("Dropping invalid manifest record {}: {}", key, e),
            }
        }

        debug!(
            "Loaded {} manifest records from {}",
            records.len(),
            manifest.path.display()
        );

        {
            let mut inner = manifest.inner.lock().await;
            inner.records = records;
            inner.filter_fingerprint = file.filter_fingerprint;
        }
        Ok(manifest)
    }

    async fn set_aside(&self) {
        let mut corrupt = self.path.clone().into_os_string();
        corrupt.push(".corrupt");
        if let Err(e) = tokio::fs::rename(&self.path, &corrupt).await {
            warn!("Could not move unreadable manifest aside: {}", e);
        }
    }

    /// Location of `manifest.json`
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the record for a canonical URL
    pub async fn lookup(&self, url: &str) -> Option<ResourceRecord> {
        self.inner.lock().await.records.get(url).cloned()
    }

    /// Upserts a record, flushing to disk every [`FLUSH_EVERY`] commits
    pub async fn commit(&self, record: ResourceRecord) -> Result<(), ManifestError> {
        let mut inner = self.inner.lock().await;
        inner.touched.insert(record.url.clone());
        inner.records.insert(record.url.clone(), record);
        inner.pending += 1;

        if inner.pending >= FLUSH_EVERY {
            self.write(&mut inner).await?;
        }
        Ok(())
    }

    /// Durably writes the manifest
    pub async fn flush(&self) -> Result<(), ManifestError> {
        let mut inner = self.inner.lock().await;
        self.write(&mut inner).await
    }

    async fn write(&self, inner: &mut Inner) -> Result<(), ManifestError> {
        let file = ManifestFileRef {
            version: MANIFEST_VERSION,
            updated_at: Utc::now(),
            filter_fingerprint: inner.filter_fingerprint.as_deref(),
            records: &inner.records,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| ManifestError::Io {
                path: self.path.clone(),
                source,
            })?;

        inner.pending = 0;
        debug!("Flushed {} manifest records", inner.records.len());
        Ok(())
    }

    /// Fingerprint of the filter spec stored by the previous run
    pub async fn filter_fingerprint(&self) -> Option<String> {
        self.inner.lock().await.filter_fingerprint.clone()
    }

    pub async fn set_filter_fingerprint(&self, fingerprint: &str) {
        self.inner.lock().await.filter_fingerprint = Some(fingerprint.to_string());
    }

    /// Snapshot of every record, in key order
    pub async fn records(&self) -> Vec<ResourceRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    /// Snapshot of the records committed during this run, in key order
    pub async fn touched_records(&self) -> Vec<ResourceRecord> {
        let inner = self.inner.lock().await;
        inner
            .records
            .values()
            .filter(|r| inner.touched.contains(&r.url))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AssetKind;
    use tempfile::TempDir;

    fn record(url: &str, status: RecordStatus) -> ResourceRecord {
        ResourceRecord::new(url, AssetKind::Html, status)
    }

    #[tokio::test]
    async fn test_open_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path()).await.unwrap();
        assert!(manifest.is_empty().await);
    }

    #[tokio::test]
    async fn test_commit_flush_reload() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path()).await.unwrap();
        manifest.set_filter_fingerprint("abc").await;
        manifest
            .commit(record("https://example.com/", RecordStatus::Fetched))
            .await
            .unwrap();
        manifest
            .commit(record("https://example.com/b", RecordStatus::Failed))
            .await
            .unwrap();
        manifest.flush().await.unwrap();

        let reloaded = Manifest::open(dir.path()).await.unwrap();
        assert_eq!(reloaded.len().await, 2);
        assert_eq!(reloaded.filter_fingerprint().await.as_deref(), Some("abc"));
        let b = reloaded.lookup("https://example.com/b").await.unwrap();
        assert_eq!(b.status, RecordStatus::Failed);
        assert!(reloaded.touched_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_unflushed_commits_are_not_on_disk() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path()).await.unwrap();
        manifest
            .commit(record("https://example.com/", RecordStatus::Fetched))
            .await
            .unwrap();
        manifest.flush().await.unwrap();
        manifest
            .commit(record("https://example.com/late", RecordStatus::Fetched))
            .await
            .unwrap();

        // Simulates a crash: the last commit was never flushed
        let reloaded = Manifest::open(dir.path()).await.unwrap();
        assert_eq!(reloaded.len().await, 1);
        assert!(reloaded.lookup("https://example.com/late").await.is_none());
    }

    #[tokio::test]
    async fn test_automatic_flush() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path()).await.unwrap();
        for i in 0..FLUSH_EVERY {
            manifest
                .commit(record(&format!("https://example.com/{}", i), RecordStatus::Fetched))
                .await
                .unwrap();
        }
        let reloaded = Manifest::open(dir.path()).await.unwrap();
        assert_eq!(reloaded.len().await, FLUSH_EVERY);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        let manifest = Manifest::open(dir.path()).await.unwrap();
        assert!(manifest.is_empty().await);
        assert!(!path.exists());
        assert!(dir.path().join(".pagepull/manifest.json.corrupt").exists());
    }

    #[tokio::test]
    async fn test_invalid_records_dropped() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{
                "version": 1,
                "updated_at": "2024-01-01T00:00:00Z",
                "records": {
                    "https://example.com/": {
                        "url": "https://example.com/",
                        "kind": "html",
                        "status": "fetched",
                        "fetched_at": "2024-01-01T00:00:00Z"
                    },
                    "https://example.com/bad": { "url": 42 }
                }
            }"#,
        )
        .unwrap();

        let manifest = Manifest::open(dir.path()).await.unwrap();
        assert_eq!(manifest.len().await, 1);
        assert!(manifest.lookup("https://example.com/").await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_version_ignored() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"version": 99, "updated_at": "2024-01-01T00:00:00Z", "records": {}}"#,
        )
        .unwrap();

        let manifest = Manifest::open(dir.path()).await.unwrap();
        assert!(manifest.is_empty().await);
    }
}
