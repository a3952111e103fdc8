//! Crawler module: the concurrent fetch pipeline
//!
//! This module contains the core crawling logic, including:
//! - The deduplicating frontier shared by all workers
//! - HTTP fetching with conditional requests and retry logic
//! - Politeness (delays, stealth profile, aggregate rate governor)
//! - Reference extraction from HTML and CSS
//! - The per-entry worker pipeline and overall run coordination

mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod politeness;
mod worker;

pub use coordinator::Mirror;
pub use fetcher::{
    build_http_client, Conditional, FetchOutcome, Fetcher, HeadDecision, ResponseHead, RetryPolicy,
    MAX_REDIRECTS,
};
pub use frontier::{Frontier, FrontierEntry, Lease, PushOutcome};
pub use parser::{extract_css, extract_html, extract_references, Extracted, ExtractedRef};
pub use politeness::{PolitenessProfile, RateGovernor, RequestPlan, STEALTH_USER_AGENTS};

pub(crate) use parser::{css_url_regex, css_url_value, import_regex, srcset_urls};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cooperative cancellation for a run
///
/// Cancelling stops the frontier from handing out or accepting entries;
/// in-flight fetches finish on their own and the rewrite pass is skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
