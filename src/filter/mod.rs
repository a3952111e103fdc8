//! Filter Engine
//!
//! Decides whether a candidate resource should be fetched and kept. The spec
//! is immutable for the duration of a run; its fingerprint is stored in the
//! manifest so that a later run with different filters revisits old rejections.

mod kind;

pub use kind::AssetKind;
pub(crate) use kind::path_extension;

use crate::config::FilterConfig;
use crate::ConfigError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

/// Everything known about a resource at the point a filter decision is made
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub url: &'a Url,
    /// Predicted or classified kind; `None` skips the type check
    pub kind: Option<AssetKind>,
    /// Size in bytes; `None` skips the size check
    pub size: Option<u64>,
    /// The seed is accepted unconditionally
    pub is_seed: bool,
}

impl<'a> Candidate<'a> {
    /// Candidate with only the URL and a predicted kind
    pub fn new(url: &'a Url, kind: Option<AssetKind>) -> Self {
        Self {
            url,
            kind,
            size: None,
            is_seed: false,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn seed(mut self, is_seed: bool) -> Self {
        self.is_seed = is_seed;
        self
    }
}

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    ExcludedType(AssetKind),
    NotIncludedType(AssetKind),
    ExcludedPattern(String),
    NoIncludePattern,
    TooSmall { size: u64, min: u64 },
    TooLarge { size: u64, max: u64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExcludedType(kind) => write!(f, "type '{}' is excluded", kind),
            Self::NotIncludedType(kind) => write!(f, "type '{}' is not included", kind),
            Self::ExcludedPattern(p) => write!(f, "matches exclude pattern '{}'", p),
            Self::NoIncludePattern => write!(f, "matches no include pattern"),
            Self::TooSmall { size, min } => {
                write!(f, "size {} bytes is below minimum {} bytes", size, min)
            }
            Self::TooLarge { size, max } => {
                write!(f, "size {} bytes is above maximum {} bytes", size, max)
            }
        }
    }
}

/// Outcome of a filter decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Immutable per-run filter configuration
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    include_types: BTreeSet<AssetKind>,
    exclude_types: BTreeSet<AssetKind>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
    min_size: Option<u64>,
    max_size: Option<u64>,
}

impl FilterSpec {
    /// Builds the spec from configuration, converting KB bounds to bytes
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        let include_types = config
            .include_types
            .iter()
            .map(|name| name.parse())
            .collect::<Result<BTreeSet<AssetKind>, _>>()?;
        let exclude_types = config
            .exclude_types
            .iter()
            .map(|name| name.parse())
            .collect::<Result<BTreeSet<AssetKind>, _>>()?;

        Ok(Self {
            include_types,
            exclude_types,
            include_patterns: compile_patterns(&config.include_patterns)?,
            exclude_patterns: compile_patterns(&config.exclude_patterns)?,
            min_size: config.min_asset_size_kb.map(|kb| kb.saturating_mul(1024)),
            max_size: config.max_asset_size_kb.map(|kb| kb.saturating_mul(1024)),
        })
    }

    /// Applies the filter, short-circuiting on the first rejection
    ///
    /// Order: asset type, regex patterns, size bounds. Include lists and size
    /// bounds never constrain HTML pages.
    pub fn accept(&self, candidate: &Candidate<'_>) -> Verdict {
        if candidate.is_seed {
            return Verdict::Accept;
        }

        let is_page = candidate.kind == Some(AssetKind::Html);

        if let Some(kind) = candidate.kind {
            if self.exclude_types.contains(&kind) {
                return Verdict::Reject(RejectReason::ExcludedType(kind));
            }
            if !is_page && !self.include_types.is_empty() && !self.include_types.contains(&kind) {
                return Verdict::Reject(RejectReason::NotIncludedType(kind));
            }
        }

        let url = candidate.url.as_str();
        if let Some(pattern) = self.exclude_patterns.iter().find(|p| p.is_match(url)) {
            return Verdict::Reject(RejectReason::ExcludedPattern(pattern.as_str().to_string()));
        }
        if !is_page
            && !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(url))
        {
            return Verdict::Reject(RejectReason::NoIncludePattern);
        }

        if let (false, Some(size)) = (is_page, candidate.size) {
            if let Some(min) = self.min_size.filter(|min| size < *min) {
                return Verdict::Reject(RejectReason::TooSmall { size, min });
            }
            if let Some(max) = self.max_size.filter(|max| size > *max) {
                return Verdict::Reject(RejectReason::TooLarge { size, max });
            }
        }

        Verdict::Accept
    }

    /// SHA-256 fingerprint of the effective filter settings
    pub fn fingerprint(&self) -> String {
        let join_kinds = |kinds: &BTreeSet<AssetKind>| {
            kinds.iter().map(AssetKind::as_str).collect::<Vec<_>>().join(",")
        };
        let join_patterns = |patterns: &[Regex]| {
            patterns.iter().map(Regex::as_str).collect::<Vec<_>>().join("\u{1f}")
        };

        let mut hasher = Sha256::new();
        hasher.update(format!(
            "include-types={}\nexclude-types={}\ninclude-patterns={}\nexclude-patterns={}\nmin={:?}\nmax={:?}\n",
            join_kinds(&self.include_types),
            join_kinds(&self.exclude_types),
            join_patterns(&self.include_patterns),
            join_patterns(&self.exclude_patterns),
            self.min_size,
            self.max_size,
        ));
        hex::encode(hasher.finalize())
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}
