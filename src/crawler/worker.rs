//! Per-entry fetch pipeline
//!
//! A worker pops entries from the frontier until it drains. Every entry ends in
//! exactly one committed [`ResourceRecord`]; no per-resource failure escapes
//! this module as an error.

use crate::crawler::fetcher::{Conditional, FetchOutcome, Fetcher, HeadDecision, ResponseHead};
use crate::crawler::frontier::{Frontier, FrontierEntry, PushOutcome};
use crate::crawler::parser::extract_references;
use crate::crawler::CancelHandle;
use crate::filter::{AssetKind, Candidate, FilterSpec, Verdict};
use crate::manifest::{
    sha256_hex, write_atomic, LinkRef, Manifest, ManifestError, ObjectStore, RecordStatus,
    ResourceRecord,
};
use crate::rewrite::{local_path_for, PathClaims};
use crate::robots::RobotsCache;
use crate::url::{canonicalize, Canonicalizer, RefContext, Rejection};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Log a progress line every this many processed entries
const PROGRESS_EVERY: u64 = 10;

/// Everything a worker needs, shared by the whole pool
#[derive(Debug)]
pub(crate) struct RunContext {
    pub seed: Url,
    /// Where the seed redirected to, if it did; its authority maps to the output root
    pub layout: OnceLock<Url>,
    pub root: PathBuf,
    pub incremental: bool,
    pub respect_robots: bool,
    pub max_depth: Option<u32>,
    pub canonicalizer: Canonicalizer,
    pub filter: FilterSpec,
    pub fingerprint: String,
    pub manifest: Manifest,
    pub objects: ObjectStore,
    pub frontier: Frontier,
    pub fetcher: Fetcher,
    pub robots: RobotsCache,
    pub claims: PathClaims,
    pub cancel: CancelHandle,
    pub started: Instant,
    pub processed: AtomicU64,
    pub files_written: AtomicU64,
    /// First manifest write failure; fatal for the run
    pub fatal: Mutex<Option<ManifestError>>,
}

impl RunContext {
    /// Drains the frontier
    pub async fn run_worker(&self, id: usize) {
        debug!("Worker {} started", id);

        while let Some(lease) = self.frontier.pop().await {
            let record = self.process(&lease.entry).await;
            debug!("{} -> {}", record.url, record.status);

            if let Err(e) = self.manifest.commit(record).await {
                error!("Cannot write manifest: {}", e);
                self.fail(e);
            }
            drop(lease);

            let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
            if processed % PROGRESS_EVERY == 0 {
                let elapsed = self.started.elapsed().as_secs_f64();
                info!(
                    "Progress: {} resources processed, {} queued, {:.2} resources/sec",
                    processed,
                    self.frontier.queued(),
                    processed as f64 / elapsed.max(f64::EPSILON)
                );
            }
        }

        debug!("Worker {} finished", id);
    }

    /// URL whose authority is mirrored at the output root
    fn layout_root(&self) -> &Url {
        self.layout.get().unwrap_or(&self.seed)
    }

    /// Records a redirect target as an alias of the entry that led to it
    ///
    /// The target is marked as seen so it is not fetched again this run. When
    /// the seed redirects within scope (`http` to `https`, apex to `www`), the
    /// target becomes the layout root.
    fn follow_redirect(&self, entry: &FrontierEntry, final_url: &Url) {
        let Ok(target) = canonicalize(final_url.as_str(), None) else {
            return;
        };
        if target == entry.url {
            return;
        }
        self.frontier.mark_seen(&target);
        debug!("{} redirected to {}", entry.url, target);

        if entry.is_seed
            && self.canonicalizer.scope().contains(&target)
            && self.layout.set(target.clone()).is_ok()
        {
            info!("Seed redirected to {}; mirroring it at the output root", target);
        }
    }

    fn fail(&self, e: ManifestError) {
        let mut fatal = match self.fatal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if fatal.is_none() {
            *fatal = Some(e);
        }
        self.cancel.cancel();
    }

    /// Processes one entry into its terminal record
    async fn process(&self, entry: &FrontierEntry) -> ResourceRecord {
        let url = &entry.url;
        let key = url.as_str();
        let prior = self.manifest.lookup(key).await;
        let predicted = entry.predicted.or_else(|| AssetKind::from_url(url));
        let referrer = entry.referrer.as_deref();

        // A rejection under the same filter settings stands without network I/O
        if let Some(prior) = prior.as_ref().filter(|p| {
            p.status == RecordStatus::SkippedFilter
                && p.filter_fingerprint.as_deref() == Some(self.fingerprint.as_str())
        }) {
            debug!("Reusing filter rejection for {}", url);
            return prior.clone();
        }

        let candidate = Candidate::new(url, predicted).seed(entry.is_seed);
        if let Verdict::Reject(reason) = self.filter.accept(&candidate) {
            debug!("Filtered {}: {}", url, reason);
            return self.skipped(entry, predicted.unwrap_or(AssetKind::Other), reason.to_string());
        }

        let mut crawl_delay = None;
        if self.respect_robots {
            if !self.robots.is_allowed(url).await {
                info!("URL {} disallowed by robots.txt", url);
                let mut record = ResourceRecord::new(
                    key,
                    predicted.unwrap_or(AssetKind::Other),
                    RecordStatus::SkippedRobots,
                )
                .discovered(entry.depth, referrer);
                record.error = Some("disallowed by robots.txt".to_string());
                return record;
            }
            crawl_delay = self.robots.crawl_delay(url).await;
        }

        let conditional = match prior.as_ref() {
            Some(prior) if self.incremental => self.conditional_for(prior).await,
            _ => None,
        };

        let check = |head: &ResponseHead| {
            let kind = AssetKind::classify(&head.final_url, head.content_type.as_deref(), predicted);
            let candidate = Candidate::new(url, Some(kind))
                .with_size(head.content_length)
                .seed(entry.is_seed);
            match self.filter.accept(&candidate) {
                Verdict::Accept => HeadDecision::Continue,
                Verdict::Reject(reason) => HeadDecision::Reject(reason),
            }
        };

        match self
            .fetcher
            .fetch(url, conditional.as_ref(), crawl_delay, check)
            .await
        {
            FetchOutcome::NotModified(head) => match prior {
                Some(prior) => self.not_modified(entry, prior, head),
                None => ResourceRecord::failed(
                    key,
                    predicted.unwrap_or(AssetKind::Other),
                    Some(304),
                    "304 Not Modified without a stored copy".to_string(),
                )
                .discovered(entry.depth, referrer),
            },
            FetchOutcome::Complete { head, body } => {
                self.complete(entry, prior.as_ref(), predicted, head, body)
                    .await
            }
            FetchOutcome::Rejected { head, reason } => {
                debug!("Filtered {} from headers: {}", url, reason);
                let kind =
                    AssetKind::classify(&head.final_url, head.content_type.as_deref(), predicted);
                let mut record = self.skipped(entry, kind, reason.to_string());
                record.http_status = Some(head.status);
                record.content_type = head.content_type;
                record.size = head.content_length;
                record
            }
            FetchOutcome::Failed(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                ResourceRecord::failed(
                    key,
                    prior.as_ref().map_or(
                        predicted.unwrap_or(AssetKind::Other),
                        |p| p.kind,
                    ),
                    e.status(),
                    e.to_string(),
                )
                .discovered(entry.depth, referrer)
            }
        }
    }

    /// Validators for a conditional request, if the stored copy is usable
    ///
    /// A missing local file, or a missing pristine body for HTML/CSS, forces an
    /// unconditional request so a 304 can never leave a hole in the mirror.
    async fn conditional_for(&self, prior: &ResourceRecord) -> Option<Conditional> {
        if !prior.status.is_success() || !prior.has_validators() {
            return None;
        }
        let local = prior.local_path.as_deref()?;
        if !tokio::fs::try_exists(self.root.join(local))
            .await
            .unwrap_or(false)
        {
            debug!("Stored file for {} is missing, fetching unconditionally", prior.url);
            return None;
        }
        if prior.kind.has_references() {
            let hash = prior.content_hash.as_deref()?;
            if !self.objects.contains(hash).await {
                return None;
            }
        }
        Some(Conditional {
            etag: prior.etag.clone(),
            last_modified: prior.last_modified.clone(),
        })
    }

    fn not_modified(
        &self,
        entry: &FrontierEntry,
        prior: ResourceRecord,
        head: ResponseHead,
    ) -> ResourceRecord {
        let candidate = Candidate::new(&entry.url, Some(prior.kind))
            .with_size(prior.size)
            .seed(entry.is_seed);
        if let Verdict::Reject(reason) = self.filter.accept(&candidate) {
            debug!("Filtered unchanged {}: {}", entry.url, reason);
            let mut record = self.skipped(entry, prior.kind, reason.to_string());
            record.size = prior.size;
            record.content_type = prior.content_type;
            return record;
        }

        self.follow_redirect(entry, &head.final_url);

        let mut record = prior;
        record.status = RecordStatus::CachedUnchanged;
        record.http_status = Some(head.status);
        record.fetched_at = chrono::Utc::now();
        record.depth = entry.depth;
        record.referrer = entry.referrer.clone();
        record.error = None;
        record.filter_fingerprint = None;
        if head.etag.is_some() {
            record.etag = head.etag;
        }
        if head.last_modified.is_some() {
            record.last_modified = head.last_modified;
        }

        self.enqueue(entry, record.kind, &record.references);
        record
    }

    async fn complete(
        &self,
        entry: &FrontierEntry,
        prior: Option<&ResourceRecord>,
        predicted: Option<AssetKind>,
        head: ResponseHead,
        body: Vec<u8>,
    ) -> ResourceRecord {
        let url = &entry.url;
        let key = url.as_str();
        let kind = AssetKind::classify(&head.final_url, head.content_type.as_deref(), predicted);
        let size = body.len() as u64;

        // Size is only certain once the body is in
        let candidate = Candidate::new(url, Some(kind))
            .with_size(Some(size))
            .seed(entry.is_seed);
        if let Verdict::Reject(reason) = self.filter.accept(&candidate) {
            debug!("Filtered {} after download: {}", url, reason);
            let mut record = self.skipped(entry, kind, reason.to_string());
            record.http_status = Some(head.status);
            record.content_type = head.content_type;
            record.size = Some(size);
            return record;
        }

        self.follow_redirect(entry, &head.final_url);
        let layout_url = match self.layout.get() {
            Some(target) if entry.is_seed => target,
            _ => url,
        };

        let hash = sha256_hex(&body);
        let preferred =
            local_path_for(layout_url, kind, head.content_type.as_deref(), self.layout_root());
        let local_path = self.claims.claim(key, &preferred);
        let file = self.root.join(&local_path);

        let unchanged = prior.is_some_and(|p| {
            p.status.is_success()
                && p.content_hash.as_deref() == Some(hash.as_str())
                && p.local_path.as_deref() == Some(local_path.as_str())
        });
        let status = if unchanged {
            RecordStatus::CachedUnchanged
        } else {
            RecordStatus::Fetched
        };

        let stored = async {
            if kind.has_references() {
                self.objects.put(&hash, &body).await?;
            }
            if !unchanged || !tokio::fs::try_exists(&file).await.unwrap_or(false) {
                write_atomic(&file, &body).await?;
                self.files_written.fetch_add(1, Ordering::Relaxed);
            }
            Ok::<(), std::io::Error>(())
        };
        if let Err(e) = stored.await {
            warn!("Cannot store {} at {}: {}", url, file.display(), e);
            return ResourceRecord::failed(key, kind, Some(head.status), format!("write failed: {}", e))
                .discovered(entry.depth, entry.referrer.as_deref());
        }

        let mut record =
            ResourceRecord::new(key, kind, status).discovered(entry.depth, entry.referrer.as_deref());
        record.local_path = Some(local_path);
        record.content_hash = Some(hash);
        record.etag = head.etag;
        record.last_modified = head.last_modified;
        record.content_type = head.content_type;
        record.http_status = Some(head.status);
        record.size = Some(size);
        record.final_url = Some(head.final_url.to_string());

        if kind.has_references() {
            let extracted = extract_references(&body, kind, record.content_type.as_deref());
            let base = extracted
                .base
                .as_deref()
                .and_then(|b| head.final_url.join(b).ok())
                .unwrap_or_else(|| head.final_url.clone());

            record.title = extracted.title;
            record.references = extracted
                .refs
                .into_iter()
                .map(|r| self.link_ref(r.raw, r.context, r.hint, &base))
                .collect();
            self.enqueue(entry, kind, &record.references);
        }

        record.exchange = Some(head.exchange);
        record
    }

    fn link_ref(
        &self,
        raw: String,
        context: RefContext,
        hint: Option<AssetKind>,
        base: &Url,
    ) -> LinkRef {
        let target = match self.canonicalizer.canonicalize(&raw, base, context) {
            Ok(canonical) => Some(canonical.url.to_string()),
            Err(Rejection::OutOfScope(url)) => Some(url.to_string()),
            Err(Rejection::Malformed(e)) => {
                debug!("Dropping reference {:?}: {}", raw, e);
                None
            }
        };
        LinkRef {
            raw,
            target,
            page: context == RefContext::Page,
            hint,
        }
    }

    /// Pushes the references of a stored document into the frontier
    ///
    /// Off-scope HTML is never expanded, and page links past the depth limit
    /// are not queued.
    fn enqueue(&self, entry: &FrontierEntry, kind: AssetKind, refs: &[LinkRef]) {
        if !entry.in_scope && kind == AssetKind::Html {
            return;
        }

        let depth = entry.depth + 1;
        let mut queued = 0;
        for link in refs {
            let Some(target) = link.target.as_deref() else {
                continue;
            };
            let Ok(url) = Url::parse(target) else {
                continue;
            };
            let in_scope = self.canonicalizer.scope().contains(&url);
            if link.page {
                if !in_scope || !entry.in_scope {
                    continue;
                }
                if self.max_depth.is_some_and(|max| depth > max) {
                    continue;
                }
            }

            let child = FrontierEntry {
                predicted: AssetKind::from_url(&url).or(link.hint),
                url,
                depth,
                referrer: Some(entry.url.to_string()),
                in_scope,
                is_seed: false,
            };
            if self.frontier.push(child) == PushOutcome::Queued {
                queued += 1;
            }
        }

        if queued > 0 {
            debug!("Queued {} new URLs from {}", queued, entry.url);
        }
    }

    fn skipped(&self, entry: &FrontierEntry, kind: AssetKind, reason: String) -> ResourceRecord {
        ResourceRecord::skipped_filter(entry.url.as_str(), kind, reason, &self.fingerprint)
            .discovered(entry.depth, entry.referrer.as_deref())
    }
}
