use crate::filter::AssetKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of a resource for the run that last touched it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    /// Body downloaded and stored; content differs from the previous run (or is new)
    Fetched,
    /// Origin returned 304, or the body hash matched the stored hash
    CachedUnchanged,
    /// Rejected by the filter spec
    SkippedFilter,
    /// Disallowed by robots.txt
    SkippedRobots,
    /// Permanent failure, or transient failure after all retries
    Failed,
}

impl RecordStatus {
    /// Returns true if the resource has a stored file
    pub fn is_success(&self) -> bool {
        matches!(self, RecordStatus::Fetched | RecordStatus::CachedUnchanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Fetched => "fetched",
            RecordStatus::CachedUnchanged => "cached-unchanged",
            RecordStatus::SkippedFilter => "skipped-filter",
            RecordStatus::SkippedRobots => "skipped-robots",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference found in an HTML or CSS body, exactly as written
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkRef {
    /// The attribute value or `url()` argument as it appears in the body
    pub raw: String,

    /// Canonical URL the reference resolves to; `None` when it cannot be canonicalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Navigable link rather than a rendering dependency
    #[serde(default)]
    pub page: bool,

    /// Kind suggested by the element the reference was found in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<AssetKind>,
}

/// Raw HTTP exchange metadata retained for archive exporters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpExchange {
    pub request_headers: Vec<(String, String)>,
    /// e.g. `HTTP/1.1 200 OK`
    pub status_line: String,
    pub response_headers: Vec<(String, String)>,
}

/// Persisted metadata about one canonical URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Canonical URL; also the manifest key
    pub url: String,
    pub kind: AssetKind,
    pub status: RecordStatus,

    /// Path of the stored file relative to the output root, `/`-separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,

    /// SHA-256 of the body as received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,

    /// Body size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    pub fetched_at: DateTime<Utc>,

    #[serde(default)]
    pub depth: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,

    /// Post-redirect URL, used as the base for relative references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,

    /// Last error or rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Fingerprint of the filter spec that produced a `skipped-filter` status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_fingerprint: Option<String>,

    /// Document title of an HTML page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<LinkRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<HttpExchange>,
}

impl ResourceRecord {
    /// Creates a record with the given status and no response metadata
    pub fn new(url: impl Into<String>, kind: AssetKind, status: RecordStatus) -> Self {
        Self {
            url: url.into(),
            kind,
            status,
            local_path: None,
            content_hash: None,
            etag: None,
            last_modified: None,
            content_type: None,
            http_status: None,
            size: None,
            fetched_at: Utc::now(),
            depth: 0,
            referrer: None,
            final_url: None,
            error: None,
            filter_fingerprint: None,
            title: None,
            references: Vec::new(),
            exchange: None,
        }
    }

    /// Record for a resource rejected by the filter spec
    pub fn skipped_filter(
        url: impl Into<String>,
        kind: AssetKind,
        reason: String,
        fingerprint: &str,
    ) -> Self {
        let mut record = Self::new(url, kind, RecordStatus::SkippedFilter);
        record.error = Some(reason);
        record.filter_fingerprint = Some(fingerprint.to_string());
        record
    }

    /// Record for a resource that failed to download
    pub fn failed(url: impl Into<String>, kind: AssetKind, status: Option<u16>, reason: String) -> Self {
        let mut record = Self::new(url, kind, RecordStatus::Failed);
        record.http_status = status;
        record.error = Some(reason);
        record
    }

    /// Sets discovery metadata
    pub fn discovered(mut self, depth: u32, referrer: Option<&str>) -> Self {
        self.depth = depth;
        self.referrer = referrer.map(str::to_string);
        self
    }

    /// Returns true if the record has validators usable for a conditional request
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}
