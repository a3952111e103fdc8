//! Filesystem helpers: atomic writes and the content-addressed object store.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── index.html                # mirrored files
//! └── .pagepull/
//!     ├── manifest.json         # State Manifest
//!     └── objects/
//!         └── {sha256}          # pristine HTML/CSS bodies
//! ```

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

/// Suffix counter so concurrent writers never share a temp file
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write bytes atomically (write to temp, then rename).
///
/// Parent directories are created as needed. A crash leaves either the old file
/// or the new one, plus at worst a stray `.part` file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Read bytes, returning None if the file doesn't exist.
pub async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.part-{}-{}", name, std::process::id(), n))
}

/// Content-addressed store for pristine bodies
#[derive(Debug, Clone)]
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the object with the given hash
    pub fn path(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    pub async fn contains(&self, hash: &str) -> bool {
        tokio::fs::try_exists(self.path(hash)).await.unwrap_or(false)
    }

    /// Stores `bytes` under `hash` unless an object with that hash already exists
    pub async fn put(&self, hash: &str, bytes: &[u8]) -> io::Result<()> {
        if self.contains(hash).await {
            return Ok(());
        }
        write_atomic(&self.path(hash), bytes).await
    }

    pub async fn get(&self, hash: &str) -> io::Result<Option<Vec<u8>>> {
        read_optional(&self.path(hash)).await
    }

    /// Deletes every object whose hash is not in `keep`; returns the number removed
    pub async fn prune(&self, keep: &HashSet<String>) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !keep.contains(&name) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
