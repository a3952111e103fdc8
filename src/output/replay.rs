//! Replay entries for archive exporters
//!
//! An exporter that writes raw HTTP exchanges needs the request and response
//! as they happened. Headers come from the record's [`HttpExchange`]; the body
//! is the pristine object for HTML and CSS (the file on disk has rewritten
//! references) and the stored file for everything else.
//!
//! [`HttpExchange`]: crate::manifest::HttpExchange

use crate::manifest::{read_optional, ObjectStore, ResourceRecord};
use std::path::Path;
use tracing::warn;

/// One replayable exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    pub url: String,
    pub local_path: String,
    pub request_headers: Vec<(String, String)>,
    pub status_line: String,
    pub response_headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Builds replay entries for every successful record with a stored body
///
/// Records whose body can no longer be found are skipped with a warning.
pub async fn replay_entries(
    root: &Path,
    records: &[ResourceRecord],
    objects: &ObjectStore,
) -> Vec<ReplayEntry> {
    let mut entries = Vec::new();

    for record in records.iter().filter(|r| r.status.is_success()) {
        let Some(local_path) = record.local_path.clone() else {
            continue;
        };

        let body = if record.kind.has_references() {
            match record.content_hash.as_deref() {
                Some(hash) => objects.get(hash).await,
                None => Ok(None),
            }
        } else {
            read_optional(&root.join(&local_path)).await
        };
        let body = match body {
            Ok(Some(body)) => body,
            Ok(None) => {
                warn!("No stored body for {}; leaving it out of the replay", record.url);
                continue;
            }
            Err(e) => {
                warn!("Cannot read body for {}: {}", record.url, e);
                continue;
            }
        };

        let exchange = record.exchange.clone().unwrap_or_default();
        let status_line = if exchange.status_line.is_empty() {
            format!("HTTP/1.1 {} OK", record.http_status.unwrap_or(200))
        } else {
            exchange.status_line
        };

        entries.push(ReplayEntry {
            url: record.url.clone(),
            local_path,
            request_headers: exchange.request_headers,
            status_line,
            response_headers: exchange.response_headers,
            body,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AssetKind;
    use crate::manifest::{sha256_hex, HttpExchange, RecordStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replay_uses_pristine_html_and_stored_assets() {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().join(".pagepull/objects"));

        let pristine = b"<a href=\"/about\">About</a>";
        let hash = sha256_hex(pristine);
        objects.put(&hash, pristine).await.unwrap();
        tokio::fs::write(dir.path().join("index.html"), b"<a href=\"about.html\">About</a>")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("logo.png"), b"PNG").await.unwrap();

        let mut page = ResourceRecord::new("https://example.com/", AssetKind::Html, RecordStatus::Fetched);
        page.local_path = Some("index.html".to_string());
        page.content_hash = Some(hash);
        page.exchange = Some(HttpExchange {
            request_headers: vec![("user-agent".to_string(), "pagepull".to_string())],
            status_line: "HTTP/1.1 200 OK".to_string(),
            response_headers: vec![("content-type".to_string(), "text/html".to_string())],
        });

        let mut logo = ResourceRecord::new("https://example.com/logo.png", AssetKind::Image, RecordStatus::CachedUnchanged);
        logo.local_path = Some("logo.png".to_string());
        logo.http_status = Some(200);

        let skipped = ResourceRecord::new("https://example.com/big.mp4", AssetKind::Media, RecordStatus::SkippedFilter);

        let entries = replay_entries(dir.path(), &[page, logo, skipped], &objects).await;
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].body, pristine.to_vec());
        assert_eq!(entries[0].status_line, "HTTP/1.1 200 OK");
        assert_eq!(entries[0].request_headers[0].1, "pagepull");

        assert_eq!(entries[1].url, "https://example.com/logo.png");
        assert_eq!(entries[1].body, b"PNG".to_vec());
        assert_eq!(entries[1].status_line, "HTTP/1.1 200 OK");
    }

    #[tokio::test]
    async fn test_missing_body_is_skipped() {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().join(".pagepull/objects"));
        let mut gone = ResourceRecord::new("https://example.com/gone.png", AssetKind::Image, RecordStatus::Fetched);
        gone.local_path = Some("gone.png".to_string());

        let entries = replay_entries(dir.path(), &[gone], &objects).await;
        assert!(entries.is_empty());
    }
}
