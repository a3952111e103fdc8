//! Run summary: counts per status, traffic, failures
//!
//! The summary is returned by every run, written to `_summary.txt` at the
//! output root and printed by the binary.

use crate::manifest::{RecordStatus, ResourceRecord};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// File name of the human-readable summary at the output root
pub const SUMMARY_FILE: &str = "_summary.txt";

/// Summary of one mirror run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Seed URL
    pub source: String,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// False when the run was cancelled before the frontier drained
    pub completed: bool,

    // Mode flags
    pub incremental: bool,
    pub stealth: bool,
    pub respect_robots: bool,
    pub workers: u32,

    // Counts per status, for the resources processed this run
    pub fetched: u64,
    pub cached_unchanged: u64,
    pub skipped_filter: u64,
    pub skipped_robots: u64,
    pub failed: u64,

    // Traffic
    pub requests: u64,
    pub bytes_downloaded: u64,
    pub robots_fetches: u64,

    /// Bodies written to disk by the workers
    pub files_written: u64,
    /// Documents changed by the rewrite pass
    pub files_rewritten: u64,
    /// References substituted by the rewrite pass
    pub references_rewritten: u64,
    /// Files deleted because their resource no longer has a stored copy
    pub stale_files_removed: u64,

    /// Failed URLs with the last error
    pub failures: Vec<(String, String)>,
    /// URLs disallowed by robots.txt
    pub robots_skipped: Vec<String>,
}

impl RunSummary {
    /// Creates an empty summary for a run that starts now
    pub fn new(source: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            source: source.into(),
            output_dir: output_dir.into(),
            started_at: now,
            finished_at: now,
            completed: false,
            incremental: true,
            stealth: false,
            respect_robots: true,
            workers: 0,
            fetched: 0,
            cached_unchanged: 0,
            skipped_filter: 0,
            skipped_robots: 0,
            failed: 0,
            requests: 0,
            bytes_downloaded: 0,
            robots_fetches: 0,
            files_written: 0,
            files_rewritten: 0,
            references_rewritten: 0,
            stale_files_removed: 0,
            failures: Vec::new(),
            robots_skipped: Vec::new(),
        }
    }

    /// Tallies the records processed during the run
    pub fn count_records<'a>(&mut self, records: impl IntoIterator<Item = &'a ResourceRecord>) {
        for record in records {
            match record.status {
                RecordStatus::Fetched => self.fetched += 1,
                RecordStatus::CachedUnchanged => self.cached_unchanged += 1,
                RecordStatus::SkippedFilter => self.skipped_filter += 1,
                RecordStatus::SkippedRobots => {
                    self.skipped_robots += 1;
                    self.robots_skipped.push(record.url.clone());
                }
                RecordStatus::Failed => {
                    self.failed += 1;
                    self.failures.push((
                        record.url.clone(),
                        record.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
            }
        }
        self.failures.sort();
        self.robots_skipped.sort();
    }

    /// Number of resources processed this run
    pub fn total(&self) -> u64 {
        self.fetched + self.cached_unchanged + self.skipped_filter + self.skipped_robots + self.failed
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

/// Formats the summary as plain text
pub fn format_summary(summary: &RunSummary) -> String {
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    let mut out = String::new();

    out.push_str("Download Summary\n");
    out.push_str("================\n\n");

    out.push_str(&format!("Source:      {}\n", summary.source));
    out.push_str(&format!("Output:      {}\n", summary.output_dir.display()));
    out.push_str(&format!(
        "Started:     {}\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "Finished:    {}\n",
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Duration:    {} seconds\n", summary.duration_seconds()));
    out.push_str(&format!(
        "Status:      {}\n\n",
        if summary.completed { "completed" } else { "cancelled" }
    ));

    out.push_str(&format!("Incremental: {}\n", yes_no(summary.incremental)));
    out.push_str(&format!("Stealth:     {}\n", yes_no(summary.stealth)));
    out.push_str(&format!("Robots.txt:  {}\n", yes_no(summary.respect_robots)));
    out.push_str(&format!("Workers:     {}\n\n", summary.workers));

    out.push_str(&format!("Resources ({}):\n", summary.total()));
    out.push_str(&"-".repeat(40));
    out.push('\n');
    out.push_str(&format!("  fetched           {}\n", summary.fetched));
    out.push_str(&format!("  cached-unchanged  {}\n", summary.cached_unchanged));
    out.push_str(&format!("  skipped-filter    {}\n", summary.skipped_filter));
    out.push_str(&format!("  skipped-robots    {}\n", summary.skipped_robots));
    out.push_str(&format!("  failed            {}\n\n", summary.failed));

    out.push_str("Traffic:\n");
    out.push_str(&"-".repeat(40));
    out.push('\n');
    out.push_str(&format!("  requests          {}\n", summary.requests));
    out.push_str(&format!("  bytes downloaded  {}\n", summary.bytes_downloaded));
    out.push_str(&format!("  robots.txt        {}\n", summary.robots_fetches));
    out.push_str(&format!("  files written     {}\n", summary.files_written));
    out.push_str(&format!("  files rewritten   {}\n", summary.files_rewritten));
    out.push_str(&format!("  references        {}\n", summary.references_rewritten));
    out.push_str(&format!("  stale removed     {}\n", summary.stale_files_removed));

    if !summary.failures.is_empty() {
        out.push_str(&format!("\nFailed ({}):\n", summary.failures.len()));
        out.push_str(&"-".repeat(40));
        out.push('\n');
        for (url, reason) in &summary.failures {
            out.push_str(&format!("  {}\n    -> {}\n", url, reason));
        }
    }

    if !summary.robots_skipped.is_empty() {
        out.push_str(&format!(
            "\nSkipped by robots.txt ({}):\n",
            summary.robots_skipped.len()
        ));
        out.push_str(&"-".repeat(40));
        out.push('\n');
        for url in &summary.robots_skipped {
            out.push_str(&format!("  {}\n", url));
        }
    }

    out
}

/// Writes `_summary.txt` at the output root
pub async fn write_summary(root: &Path, summary: &RunSummary) -> std::io::Result<()> {
    tokio::fs::write(root.join(SUMMARY_FILE), format_summary(summary)).await
}

/// Prints the summary to stdout
pub fn print_summary(summary: &RunSummary) {
    println!("=== PagePull Run Summary ===\n");
    println!("Source: {}", summary.source);
    println!("Output: {}", summary.output_dir.display());
    println!(
        "Status: {} in {} seconds",
        if summary.completed { "completed" } else { "cancelled" },
        summary.duration_seconds()
    );
    println!();
    println!(
        "  {} fetched, {} cached, {} filtered, {} robots, {} failed",
        summary.fetched,
        summary.cached_unchanged,
        summary.skipped_filter,
        summary.skipped_robots,
        summary.failed
    );
    println!(
        "  {} requests, {} bytes downloaded",
        summary.requests, summary.bytes_downloaded
    );

    if !summary.failures.is_empty() {
        println!("\nFailures:");
        for (url, reason) in &summary.failures {
            println!("  {} - {}", url, reason);
        }
    }
}
