//! URL handling module for PagePull
//!
//! Every URL that reaches the frontier or the manifest passes through the
//! [`Canonicalizer`], which normalizes it and decides whether it is inside the
//! crawl scope defined by the seed's registrable domain.

mod domain;
mod normalize;

use crate::{UrlError, UrlResult};
use url::Url;

// Re-export main functions
pub use domain::{extract_domain, host_in_domain, origin_key, registrable_domain};
pub use normalize::{canonicalize, normalize_url};

/// The context a reference was discovered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefContext {
    /// A navigable link (`<a href>`, `<iframe src>`, ...)
    Page,
    /// A resource needed to render the referring document
    Asset,
}

/// The registrable-domain boundary of a crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    registrable: String,
}

impl Scope {
    /// Builds the scope from the seed URL
    pub fn from_seed(seed: &Url) -> UrlResult<Self> {
        let host = seed.host_str().ok_or(UrlError::MissingHost)?;
        Ok(Self {
            registrable: registrable_domain(host),
        })
    }

    /// The registrable domain this scope covers
    pub fn domain(&self) -> &str {
        &self.registrable
    }

    /// Returns true if the URL's host is inside the scope
    pub fn contains(&self, url: &Url) -> bool {
        url.host_str()
            .map_or(false, |host| host_in_domain(host, &self.registrable))
    }
}

/// A canonicalized reference that may enter the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub url: Url,
    /// False for off-scope assets; such resources are fetched but never expanded
    pub in_scope: bool,
}

/// Why a reference was not turned into a canonical URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Unparseable, unsupported scheme or missing host
    Malformed(UrlError),
    /// A page link leaving the crawl scope
    OutOfScope(Url),
}

/// Canonicalizes references and applies the crawl scope
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    scope: Scope,
}

impl Canonicalizer {
    /// Creates a canonicalizer scoped to the seed's registrable domain
    pub fn new(seed: &Url) -> UrlResult<Self> {
        Ok(Self {
            scope: Scope::from_seed(seed)?,
        })
    }

    /// Returns the scope
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Canonicalizes `raw` relative to `base`
    ///
    /// Off-scope page links are rejected; off-scope assets are accepted with
    /// `in_scope` cleared.
    pub fn canonicalize(
        &self,
        raw: &str,
        base: &Url,
        context: RefContext,
    ) -> Result<Canonical, Rejection> {
        let url = canonicalize(raw, Some(base)).map_err(Rejection::Malformed)?;
        let in_scope = self.scope.contains(&url);

        if !in_scope && context == RefContext::Page {
            return Err(Rejection::OutOfScope(url));
        }

        Ok(Canonical { url, in_scope })
    }
}
