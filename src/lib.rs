//! PagePull: polite, incremental website mirroring
//!
//! This crate crawls the pages reachable from a seed URL, downloads the assets
//! they reference, rewrites every reference into a relative local path, and keeps
//! a manifest of what was fetched so later runs can use conditional requests.

pub mod config;
pub mod crawler;
pub mod filter;
pub mod manifest;
pub mod output;
pub mod rewrite;
pub mod robots;
pub mod schedule;
pub mod url;

use std::path::PathBuf;
use thiserror::Error;

/// Process-level error for a mirror run
///
/// Per-resource failures never surface here; they are recorded in the manifest.
/// Only conditions that make the whole run impossible are returned as errors.
#[derive(Debug, Error)]
pub enum PagePullError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Manifest error: {0}")]
    Manifest(#[from] manifest::ManifestError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Invalid interval '{0}': use formats like 30s, 15m, 6h, 1d")]
    Interval(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid filter pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Unknown asset type: {0}")]
    UnknownAssetType(String),
}

/// Canonicalization errors: the discovered string can never become a key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Empty reference")]
    Empty,
}

/// Network-level failure of a single fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeout, connection failure, 5xx or 429; retried with backoff
    #[error("transient failure after {attempts} attempt(s): {reason}")]
    Transient {
        status: Option<u16>,
        reason: String,
        attempts: u32,
    },

    /// 4xx other than 429, redirect exhaustion, or an unusable request
    #[error("permanent failure: {reason}")]
    Permanent { status: Option<u16>, reason: String },
}

impl FetchError {
    /// HTTP status associated with the failure, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }
}

/// Result type alias for PagePull operations
pub type Result<T> = std::result::Result<T, PagePullError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CancelHandle, Mirror};
pub use filter::{AssetKind, FilterSpec, Verdict};
pub use manifest::{Manifest, RecordStatus, ResourceRecord};
pub use output::RunSummary;
pub use url::{canonicalize, Canonicalizer, Scope};
