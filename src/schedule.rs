//! Interval scheduler around [`Mirror::run_once`]
//!
//! Intervals are written as a number and a unit: `30s`, `15m`, `6h`, `1d`.

use crate::crawler::{CancelHandle, Mirror};
use crate::output::RunSummary;
use crate::{PagePullError, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

fn interval_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)\s*([smhd])$").ok())
        .as_ref()
}

/// Parses an interval such as `30s`, `15m`, `6h` or `1d`
///
/// ```
/// use pagepull::schedule::parse_interval;
/// use std::time::Duration;
///
/// assert_eq!(parse_interval("15m").unwrap(), Duration::from_secs(900));
/// ```
pub fn parse_interval(text: &str) -> Result<Duration> {
    let invalid = || PagePullError::Interval(text.to_string());
    let caps = interval_regex()
        .and_then(|re| re.captures(text.trim()))
        .ok_or_else(invalid)?;

    let value: u64 = caps[1].parse().map_err(|_| invalid())?;
    let unit = match caps[2].to_ascii_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        _ => 86_400,
    };
    let seconds = value.checked_mul(unit).ok_or_else(invalid)?;
    if seconds == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(seconds))
}

/// Formats a duration in the largest unit that divides it exactly
pub fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    match secs {
        0 => "0s".to_string(),
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

/// Runs the mirror repeatedly with `interval` between the end of one run and
/// the start of the next
///
/// Stops after `max_runs` runs when given, or when `cancel` fires; a run in
/// progress is cancelled through the mirror's own handle. A failed run is
/// logged and the schedule continues. Returns the summaries of the runs that
/// finished.
pub async fn run_scheduled(
    mirror: &Mirror,
    interval: Duration,
    max_runs: Option<u32>,
    cancel: &CancelHandle,
) -> Vec<RunSummary> {
    let mut summaries = Vec::new();
    let mut run = 0u32;

    loop {
        run += 1;
        info!("Scheduled run {} starting", run);
        match mirror.run_once().await {
            Ok(summary) => summaries.push(summary),
            Err(e) => warn!("Scheduled run {} failed: {}", run, e),
        }

        if max_runs.is_some_and(|max| run >= max) {
            info!("Reached {} scheduled runs", run);
            break;
        }
        if cancel.is_cancelled() {
            break;
        }

        info!("Next run in {}", format_interval(interval));
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                info!("Schedule cancelled");
                break;
            }
        }
    }

    summaries
}
