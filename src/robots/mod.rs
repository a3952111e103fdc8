//! Robots.txt handling module
//!
//! robots.txt is fetched at most once per origin per run and cached in a
//! [`RobotsCache`] shared by every worker. Concurrent first requests for the same
//! origin wait on a single fetch.

mod parser;

pub use parser::{looks_like_html, RobotsRules};

use crate::config::RobotsUnreachable;
use crate::crawler::RateGovernor;
use crate::url::origin_key;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

/// Fetches robots.txt for an origin
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `origin` - `scheme://host[:port]` of the site
/// * `user_agent` - Value of the `User-Agent` header
/// * `unreachable` - Policy when the file cannot be retrieved
///
/// # Returns
///
/// The parsed rules. A 4xx response means there are no rules; a 5xx response or a
/// network error applies the unreachable policy. A body that is really an HTML
/// page is treated as absent.
pub async fn fetch_robots(
    client: &Client,
    origin: &str,
    user_agent: &str,
    unreachable: RobotsUnreachable,
) -> RobotsRules {
    let robots_url = format!("{}/robots.txt", origin);
    let fallback = match unreachable {
        RobotsUnreachable::Allow => RobotsRules::allow_all(),
        RobotsUnreachable::Deny => RobotsRules::deny_all(),
    };

    let response = match client
        .get(&robots_url)
        .header(USER_AGENT, user_agent)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!("Could not fetch {}: {}", robots_url, e);
            return fallback;
        }
    };

    let status = response.status();
    if status.is_client_error() {
        debug!("{} returned {}; no restrictions", robots_url, status);
        return RobotsRules::allow_all();
    }
    if !status.is_success() {
        warn!("{} returned {}", robots_url, status);
        return fallback;
    }

    let is_html_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.to_ascii_lowercase().contains("text/html"));

    match response.text().await {
        Ok(body) if is_html_type || looks_like_html(&body) => {
            debug!("{} served HTML; ignoring", robots_url);
            RobotsRules::allow_all()
        }
        Ok(body) => RobotsRules::from_content(&body),
        Err(e) => {
            warn!("Could not read {}: {}", robots_url, e);
            fallback
        }
    }
}

/// Per-run, per-origin robots.txt cache
///
/// robots.txt requests take their slot from the same [`RateGovernor`] as page
/// and asset requests.
#[derive(Debug)]
pub struct RobotsCache {
    client: Client,
    governor: Arc<RateGovernor>,
    /// Product token matched against `User-agent` groups
    agent_token: String,
    /// `User-Agent` header sent for robots.txt requests
    user_agent: String,
    unreachable: RobotsUnreachable,
    origins: Mutex<HashMap<String, Arc<OnceCell<Arc<RobotsRules>>>>>,
    fetches: AtomicU64,
}

impl RobotsCache {
    pub fn new(
        client: Client,
        governor: Arc<RateGovernor>,
        agent_token: impl Into<String>,
        user_agent: impl Into<String>,
        unreachable: RobotsUnreachable,
    ) -> Self {
        Self {
            client,
            governor,
            agent_token: agent_token.into(),
            user_agent: user_agent.into(),
            unreachable,
            origins: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Returns the rules for the URL's origin, fetching them on first use
    pub async fn rules_for(&self, url: &Url) -> Arc<RobotsRules> {
        let origin = origin_key(url);
        let cell = {
            let mut origins = match self.origins.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            origins.entry(origin.clone()).or_default().clone()
        };

        cell.get_or_init(|| async {
            self.governor.acquire().await;
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let rules = fetch_robots(&self.client, &origin, &self.user_agent, self.unreachable).await;
            Arc::new(rules)
        })
        .await
        .clone()
    }

    /// Checks the URL against its origin's rules
    pub async fn is_allowed(&self, url: &Url) -> bool {
        self.rules_for(url)
            .await
            .is_allowed(url.as_str(), &self.agent_token)
    }

    /// Crawl-delay requested by the URL's origin
    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.rules_for(url)
            .await
            .crawl_delay(&self.agent_token)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Number of robots.txt requests issued so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
