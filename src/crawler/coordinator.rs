//! Mirror coordinator - run orchestration
//!
//! This module drives one complete run:
//! - Preparing the output directory and loading the manifest
//! - Seeding the frontier and running the worker pool until it drains
//! - Running the rewrite pass, pruning stale files and writing the sitemap
//! - Writing the run summary and the final manifest

use crate::config::{validate, Config};
use crate::crawler::fetcher::{build_http_client, Fetcher, RetryPolicy};
use crate::crawler::frontier::{Frontier, FrontierEntry};
use crate::crawler::politeness::{PolitenessProfile, RateGovernor};
use crate::crawler::worker::RunContext;
use crate::crawler::CancelHandle;
use crate::filter::FilterSpec;
use crate::manifest::{objects_dir, Manifest, ObjectStore};
use crate::output::{write_sitemap, write_summary, RunSummary};
use crate::rewrite::{self, PathClaims};
use crate::robots::RobotsCache;
use crate::url::{canonicalize, Canonicalizer};
use crate::{PagePullError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;

/// A configured mirror of one site into one output directory
///
/// # Example
///
/// ```no_run
/// use pagepull::{Config, Mirror};
///
/// # async fn example() -> pagepull::Result<()> {
/// let mut config = Config::default();
/// config.site.url = "https://example.com/".to_string();
/// config.output.directory = "example_mirror".to_string();
///
/// let mirror = Mirror::new(config)?;
/// let summary = mirror.run_once().await?;
/// println!("{} fetched, {} failed", summary.fetched, summary.failed);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Mirror {
    config: Config,
    seed: Url,
    root: PathBuf,
    canonicalizer: Canonicalizer,
    filter: FilterSpec,
    cancel: CancelHandle,
}

impl Mirror {
    /// Validates the configuration and prepares the run-independent state
    pub fn new(config: Config) -> Result<Self> {
        validate(&config)?;

        let seed = canonicalize(&config.site.url, None)?;
        let canonicalizer = Canonicalizer::new(&seed)?;
        let filter = FilterSpec::from_config(&config.filter)?;
        let root = PathBuf::from(&config.output.directory);

        Ok(Self {
            config,
            seed,
            root,
            canonicalizer,
            filter,
            cancel: CancelHandle::new(),
        })
    }

    /// Canonical seed URL
    pub fn seed(&self) -> &Url {
        &self.seed
    }

    /// Output root
    pub fn output_dir(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle that stops the current run and any scheduled ones
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs one complete mirror pass
    ///
    /// Per-resource failures are recorded and reported in the summary. Only an
    /// unusable output directory, an unwritable manifest or a client that cannot
    /// be built fail the run.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let crawler = &self.config.crawler;
        let mut summary = RunSummary::new(self.seed.as_str(), &self.root);
        summary.incremental = crawler.incremental;
        summary.stealth = crawler.stealth;
        summary.respect_robots = crawler.respect_robots;
        summary.workers = crawler.workers;

        info!("Mirroring {} into {}", self.seed, self.root.display());
        self.prepare_output_dir().await?;

        let manifest = Manifest::open(&self.root).await?;
        let fingerprint = self.filter.fingerprint();
        if let Some(previous) = manifest.filter_fingerprint().await {
            if previous != fingerprint {
                info!("Filter settings changed since the last run; earlier rejections will be re-evaluated");
            }
        }
        manifest.set_filter_fingerprint(&fingerprint).await;

        // Paths held before this run, for stable claims and stale-file pruning
        let claims = PathClaims::new();
        let previous: HashMap<String, String> = manifest
            .records()
            .await
            .into_iter()
            .filter(|r| r.status.is_success())
            .filter_map(|r| Some((r.url, r.local_path?)))
            .collect();
        for (url, path) in &previous {
            claims.seed(url, path);
        }
        info!("Loaded {} stored resources from the manifest", previous.len());

        let client = build_http_client(crawler, &self.config.user_agent)?;
        let honest_agent = self.config.user_agent.header_value();
        let governor = Arc::new(RateGovernor::new(crawler.requests_per_second));
        let robots = RobotsCache::new(
            client.clone(),
            Arc::clone(&governor),
            self.config.user_agent.crawler_name.clone(),
            honest_agent.clone(),
            crawler.robots_unreachable,
        );
        let profile = PolitenessProfile::new(
            Duration::from_millis(crawler.delay_ms),
            honest_agent,
            crawler.stealth,
            crawler.random_seed,
        );
        let fetcher = Fetcher::new(
            client,
            RetryPolicy::from_config(crawler),
            governor,
            Arc::new(profile),
        );

        let frontier = Frontier::new(self.cancel.clone());
        frontier.push(FrontierEntry::seed(self.seed.clone()));

        let ctx = Arc::new(RunContext {
            seed: self.seed.clone(),
            layout: OnceLock::new(),
            root: self.root.clone(),
            incremental: crawler.incremental,
            respect_robots: crawler.respect_robots,
            max_depth: crawler.max_depth,
            canonicalizer: self.canonicalizer.clone(),
            filter: self.filter.clone(),
            fingerprint,
            manifest,
            objects: ObjectStore::new(objects_dir(&self.root)),
            frontier,
            fetcher,
            robots,
            claims,
            cancel: self.cancel.clone(),
            started: Instant::now(),
            processed: AtomicU64::new(0),
            files_written: AtomicU64::new(0),
            fatal: Mutex::new(None),
        });

        let mut workers = JoinSet::new();
        for id in 0..crawler.workers as usize {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.run_worker(id).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        let fatal = match ctx.fatal.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(e) = fatal {
            return Err(PagePullError::Manifest(e));
        }
        ctx.manifest.flush().await?;

        summary.completed = !self.cancel.is_cancelled();
        info!(
            "Crawl finished: {} resources processed in {:?}",
            ctx.processed.load(Ordering::Relaxed),
            ctx.started.elapsed()
        );

        if summary.completed {
            let records = ctx.manifest.records().await;

            let report = rewrite::run(&self.root, &records, &ctx.objects).await;
            summary.files_rewritten = report.files_written as u64;
            summary.references_rewritten = report.references as u64;

            let removed = rewrite::prune_stale_files(&self.root, &previous, &records).await;
            if !removed.is_empty() {
                info!("Removed {} stale files", removed.len());
            }
            summary.stale_files_removed = removed.len() as u64;

            let objects_removed = rewrite::prune_objects(&ctx.objects, &records).await;
            if objects_removed > 0 {
                info!("Pruned {} unreferenced stored bodies", objects_removed);
            }

            if let Err(e) = write_sitemap(&self.root, self.seed.as_str(), &records).await {
                warn!("Cannot write sitemap: {}", e);
            }
        } else {
            warn!("Run was cancelled; skipping the rewrite pass");
        }

        summary.count_records(&ctx.manifest.touched_records().await);
        summary.requests = ctx.fetcher.request_count();
        summary.bytes_downloaded = ctx.fetcher.bytes_downloaded();
        summary.robots_fetches = ctx.robots.fetch_count();
        summary.files_written = ctx.files_written.load(Ordering::Relaxed);
        summary.finished_at = Utc::now();

        if let Err(e) = write_summary(&self.root, &summary).await {
            warn!("Cannot write run summary: {}", e);
        }

        info!(
            "Run {}: {} fetched, {} cached, {} skipped, {} failed",
            if summary.completed { "completed" } else { "cancelled" },
            summary.fetched,
            summary.cached_unchanged,
            summary.skipped_filter + summary.skipped_robots,
            summary.failed
        );
        Ok(summary)
    }

    async fn prepare_output_dir(&self) -> Result<()> {
        if self.config.output.clean {
            match tokio::fs::remove_dir_all(&self.root).await {
                Ok(()) => info!("Removed previous output at {}", self.root.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(PagePullError::OutputDir {
                        path: self.root.clone(),
                        source,
                    })
                }
            }
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| PagePullError::OutputDir {
                path: self.root.clone(),
                source,
            })
    }
}
