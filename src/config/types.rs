use serde::Deserialize;

/// Main configuration structure for a mirror run
///
/// Every section is optional in the TOML file; missing fields take the defaults
/// below. Command-line flags are applied on top of the loaded file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub filter: FilterConfig,
    pub output: OutputConfig,
}

/// The site being mirrored
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Seed URL; its registrable domain defines the crawl scope
    pub url: String,
}

/// What to do when robots.txt cannot be retrieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotsUnreachable {
    #[default]
    Allow,
    Deny,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of concurrent fetch workers
    pub workers: u32,

    /// Base delay each worker waits before a request (milliseconds)
    #[serde(rename = "delay-ms")]
    pub delay_ms: u64,

    /// Aggregate request rate across all workers (requests per second)
    #[serde(rename = "requests-per-second")]
    pub requests_per_second: f64,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Attempts per resource for transient failures, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Initial retry backoff (milliseconds); doubles per attempt
    #[serde(rename = "retry-base-ms")]
    pub retry_base_ms: u64,

    /// Upper bound for a single backoff sleep (milliseconds)
    #[serde(rename = "retry-max-ms")]
    pub retry_max_ms: u64,

    /// Whether robots.txt rules are enforced
    #[serde(rename = "respect-robots")]
    pub respect_robots: bool,

    /// Policy applied when robots.txt cannot be fetched
    #[serde(rename = "robots-unreachable")]
    pub robots_unreachable: RobotsUnreachable,

    /// Randomized delays and rotating browser user agents
    pub stealth: bool,

    /// Send conditional requests based on the previous run's manifest
    pub incremental: bool,

    /// Maximum link depth for pages (unlimited when absent)
    #[serde(rename = "max-depth")]
    pub max_depth: Option<u32>,

    /// Seed for the jitter/user-agent random source (random when absent)
    #[serde(rename = "random-seed")]
    pub random_seed: Option<u64>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            delay_ms: 300,
            requests_per_second: 10.0,
            timeout_secs: 30,
            max_attempts: 3,
            retry_base_ms: 500,
            retry_max_ms: 10_000,
            respect_robots: true,
            robots_unreachable: RobotsUnreachable::Allow,
            stealth: false,
            incremental: true,
            max_depth: None,
            random_seed: None,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the token matched against robots.txt groups
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "PagePull".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://github.com".to_string(),
        }
    }
}

impl UserAgentConfig {
    /// Honest user agent: `Name/Version (Offline Copy Tool; +ContactURL)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (Offline Copy Tool; +{})",
            self.crawler_name, self.crawler_version, self.contact_url
        )
    }
}

/// Asset filter configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Only keep these asset types (html is never constrained by this list)
    #[serde(rename = "include-types")]
    pub include_types: Vec<String>,

    /// Never keep these asset types
    #[serde(rename = "exclude-types")]
    pub exclude_types: Vec<String>,

    /// Regexes; when non-empty a candidate must match at least one
    #[serde(rename = "include-patterns")]
    pub include_patterns: Vec<String>,

    /// Regexes; a matching candidate is rejected
    #[serde(rename = "exclude-patterns")]
    pub exclude_patterns: Vec<String>,

    /// Minimum asset size in KB
    #[serde(rename = "min-asset-size-kb")]
    pub min_asset_size_kb: Option<u64>,

    /// Maximum asset size in KB
    #[serde(rename = "max-asset-size-kb")]
    pub max_asset_size_kb: Option<u64>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the mirror; also holds `.pagepull/manifest.json`
    pub directory: String,

    /// Discard the manifest and the output tree before each run
    pub clean: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "website_download".to_string(),
            clean: false,
        }
    }
}
