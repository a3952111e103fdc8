//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client
//! - Conditional requests from stored validators
//! - Header-stage filtering before a body is downloaded
//! - Retry with exponential backoff for transient failures
//! - Recording the raw exchange for archive exporters

use crate::config::{CrawlerConfig, UserAgentConfig};
use crate::crawler::politeness::{PolitenessProfile, RateGovernor};
use crate::filter::RejectReason;
use crate::manifest::HttpExchange;
use crate::FetchError;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER, USER_AGENT,
};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Maximum redirect hops followed per request
pub const MAX_REDIRECTS: usize = 10;

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Builds an HTTP client with proper configuration
///
/// Content encodings are decoded transparently. Redirects are followed up to
/// [`MAX_REDIRECTS`] hops; the `User-Agent` is set per request.
///
/// # Example
///
/// ```no_run
/// use pagepull::config::{CrawlerConfig, UserAgentConfig};
/// use pagepull::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlerConfig::default(), &UserAgentConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    crawler: &CrawlerConfig,
    user_agent: &UserAgentConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_secs(crawler.timeout_secs))
        .connect_timeout(Duration::from_secs(crawler.timeout_secs.min(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per resource, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// Backoff after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 2_u32.pow(exponent);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Validators from a previous run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditional {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Conditional {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Response metadata available before the body is read
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    /// URL after redirects
    pub final_url: Url,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub exchange: HttpExchange,
}

/// Verdict of the header-stage check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadDecision {
    Continue,
    Reject(RejectReason),
}

/// Final result of fetching one resource
#[derive(Debug)]
pub enum FetchOutcome {
    /// 304 to a conditional request
    NotModified(ResponseHead),
    /// Full 2xx response
    Complete { head: ResponseHead, body: Vec<u8> },
    /// Rejected from the response headers; the body was never read
    Rejected { head: ResponseHead, reason: RejectReason },
    Failed(FetchError),
}

enum Attempt {
    Done(FetchOutcome),
    Retry {
        status: Option<u16>,
        reason: String,
        retry_after: Option<Duration>,
    },
}

/// Politeness-gated HTTP fetcher shared by all workers
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
    governor: Arc<RateGovernor>,
    profile: Arc<PolitenessProfile>,
    requests: AtomicU64,
    bytes: AtomicU64,
}

impl Fetcher {
    pub fn new(
        client: Client,
        retry: RetryPolicy,
        governor: Arc<RateGovernor>,
        profile: Arc<PolitenessProfile>,
    ) -> Self {
        Self {
            client,
            retry,
            governor,
            profile,
            requests: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// HTTP requests sent so far, retries included
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Body bytes downloaded so far
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Fetches a URL with politeness, retries and a header-stage check
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Header check, then body |
    /// | 304 | `NotModified` |
    /// | 429, 5xx | Retry with backoff (Retry-After honoured up to the cap) |
    /// | Timeout, connection error, body read error | Retry with backoff |
    /// | Other 4xx, other 3xx | Permanent failure |
    /// | Too many redirects | Permanent failure |
    ///
    /// # Arguments
    ///
    /// * `url` - The canonical URL to fetch
    /// * `conditional` - Validators to send, if any
    /// * `crawl_delay` - The origin's robots Crawl-delay
    /// * `check` - Called with the response head of a 2xx before the body is read
    pub async fn fetch<F>(
        &self,
        url: &Url,
        conditional: Option<&Conditional>,
        crawl_delay: Option<Duration>,
        check: F,
    ) -> FetchOutcome
    where
        F: Fn(&ResponseHead) -> HeadDecision,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(url, conditional, crawl_delay, &check).await {
                Attempt::Done(outcome) => return outcome,
                Attempt::Retry {
                    status,
                    reason,
                    retry_after,
                } => {
                    if attempt >= self.retry.max_attempts {
                        return FetchOutcome::Failed(FetchError::Transient {
                            status,
                            reason,
                            attempts: attempt,
                        });
                    }
                    let wait = retry_after
                        .map(|d| d.min(self.retry.max_delay))
                        .unwrap_or_else(|| self.retry.backoff(attempt));
                    warn!(
                        "Transient failure for {} ({}); retrying in {:?} (attempt {}/{})",
                        url, reason, wait, attempt, self.retry.max_attempts
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn attempt<F>(
        &self,
        url: &Url,
        conditional: Option<&Conditional>,
        crawl_delay: Option<Duration>,
        check: &F,
    ) -> Attempt
    where
        F: Fn(&ResponseHead) -> HeadDecision,
    {
        let plan = self.profile.plan(crawl_delay);
        if !plan.delay.is_zero() {
            tokio::time::sleep(plan.delay).await;
        }
        self.governor.acquire().await;

        let request = match self
            .client
            .get(url.clone())
            .headers(request_headers(&plan.user_agent, conditional))
            .build()
        {
            Ok(request) => request,
            Err(e) => {
                return Attempt::Done(FetchOutcome::Failed(FetchError::Permanent {
                    status: None,
                    reason: e.to_string(),
                }))
            }
        };
        let sent_headers = header_pairs(request.headers());

        self.requests.fetch_add(1, Ordering::Relaxed);
        debug!("GET {}", url);

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => return classify_error(e),
        };

        let status = response.status();
        let head = ResponseHead {
            status: status.as_u16(),
            final_url: response.url().clone(),
            content_type: header_string(response.headers(), CONTENT_TYPE.as_str()),
            content_length: response.content_length().or_else(|| {
                header_string(response.headers(), CONTENT_LENGTH.as_str())
                    .and_then(|v| v.parse().ok())
            }),
            etag: header_string(response.headers(), ETAG.as_str()),
            last_modified: header_string(response.headers(), LAST_MODIFIED.as_str()),
            exchange: HttpExchange {
                request_headers: sent_headers,
                status_line: format!(
                    "{:?} {} {}",
                    response.version(),
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default()
                )
                .trim_end()
                .to_string(),
                response_headers: header_pairs(response.headers()),
            },
        };

        if status == StatusCode::NOT_MODIFIED {
            if conditional.map_or(true, Conditional::is_empty) {
                return Attempt::Done(FetchOutcome::Failed(FetchError::Permanent {
                    status: Some(304),
                    reason: "304 Not Modified to an unconditional request".to_string(),
                }));
            }
            return Attempt::Done(FetchOutcome::NotModified(head));
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Attempt::Retry {
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
                retry_after: header_string(response.headers(), RETRY_AFTER.as_str())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
            };
        }

        if !status.is_success() {
            return Attempt::Done(FetchOutcome::Failed(FetchError::Permanent {
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
            }));
        }

        if let HeadDecision::Reject(reason) = check(&head) {
            debug!("Rejected {} from headers: {}", url, reason);
            return Attempt::Done(FetchOutcome::Rejected { head, reason });
        }

        match response.bytes().await {
            Ok(body) => {
                self.bytes.fetch_add(body.len() as u64, Ordering::Relaxed);
                Attempt::Done(FetchOutcome::Complete {
                    head,
                    body: body.to_vec(),
                })
            }
            Err(e) => Attempt::Retry {
                status: Some(status.as_u16()),
                reason: format!("body read failed: {}", e),
                retry_after: None,
            },
        }
    }
}

fn request_headers(user_agent: &str, conditional: Option<&Conditional>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

    if let Some(conditional) = conditional {
        if let Some(value) = conditional
            .etag
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(IF_NONE_MATCH, value);
        }
        if let Some(value) = conditional
            .last_modified
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }
    headers
}

fn classify_error(error: reqwest::Error) -> Attempt {
    if error.is_redirect() {
        return Attempt::Done(FetchOutcome::Failed(FetchError::Permanent {
            status: None,
            reason: format!("redirect limit exceeded: {}", error),
        }));
    }
    if error.is_builder() {
        return Attempt::Done(FetchOutcome::Failed(FetchError::Permanent {
            status: None,
            reason: error.to_string(),
        }));
    }
    let reason = if error.is_timeout() {
        "request timeout".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    };
    Attempt::Retry {
        status: None,
        reason,
        retry_after: None,
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
