//! Output module for run reports and exporter data
//!
//! This module handles:
//! - The `_summary.txt` run summary and its console rendering
//! - The `_sitemap.html` index of mirrored pages
//! - Replay entries consumed by archive exporters

mod replay;
mod sitemap;
mod summary;

pub use replay::{replay_entries, ReplayEntry};
pub use sitemap::{build_sitemap, write_sitemap, SITEMAP_FILE};
pub use summary::{format_summary, print_summary, write_summary, RunSummary, SUMMARY_FILE};
