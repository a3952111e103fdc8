//! Politeness: per-request delays, user-agent selection and the shared rate governor.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Browser user agents rotated in stealth mode
pub const STEALTH_USER_AGENTS: [&str; 10] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Default stealth jitter bounds
pub const STEALTH_JITTER: (Duration, Duration) = (Duration::from_secs(1), Duration::from_secs(3));

/// Delay and identity for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    pub delay: Duration,
    pub user_agent: String,
}

/// Per-request politeness settings handed to every worker
///
/// Randomness comes from the profile's own seeded generator, so a run with a
/// fixed `random-seed` draws the same jitter and user-agent sequence.
#[derive(Debug)]
pub struct PolitenessProfile {
    base_delay: Duration,
    honest_agent: String,
    stealth: bool,
    jitter: (Duration, Duration),
    rng: Mutex<StdRng>,
}

impl PolitenessProfile {
    pub fn new(base_delay: Duration, honest_agent: impl Into<String>, stealth: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            base_delay,
            honest_agent: honest_agent.into(),
            stealth,
            jitter: STEALTH_JITTER,
            rng: Mutex::new(rng),
        }
    }

    /// Overrides the stealth jitter bounds
    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter = (min.min(max), max.max(min));
        self
    }

    pub fn is_stealth(&self) -> bool {
        self.stealth
    }

    /// The identifying user agent used outside stealth mode
    pub fn honest_agent(&self) -> &str {
        &self.honest_agent
    }

    /// Plans the next request
    ///
    /// The delay is the base delay raised to the origin's Crawl-delay, plus a
    /// uniform jitter in stealth mode.
    pub fn plan(&self, crawl_delay: Option<Duration>) -> RequestPlan {
        let mut delay = self.base_delay.max(crawl_delay.unwrap_or_default());

        if !self.stealth {
            return RequestPlan {
                delay,
                user_agent: self.honest_agent.clone(),
            };
        }

        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (min, max) = self.jitter;
        let jitter_ms = rng.random_range(min.as_millis() as u64..=max.as_millis() as u64);
        delay += Duration::from_millis(jitter_ms);
        let agent = STEALTH_USER_AGENTS[rng.random_range(0..STEALTH_USER_AGENTS.len())];

        RequestPlan {
            delay,
            user_agent: agent.to_string(),
        }
    }
}

/// Caps the aggregate request rate across all workers
///
/// Hands out evenly spaced request slots; a caller sleeps until its slot.
#[derive(Debug)]
pub struct RateGovernor {
    interval: Duration,
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl RateGovernor {
    /// Creates a governor for `requests_per_second` (must be positive)
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits for the next free request slot
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
