//! Frontier of pending work shared by the worker pool.
//!
//! Entries are deduplicated by canonical URL for the whole run: once a URL has
//! been pushed it is never queued again, whether it is still waiting, in flight,
//! or already recorded. The queue is FIFO, so discovery is breadth-first.

use crate::crawler::CancelHandle;
use crate::filter::AssetKind;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use url::Url;

/// A pending unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Canonical URL
    pub url: Url,
    /// Link depth from the seed
    pub depth: u32,
    /// Canonical URL of the referring document
    pub referrer: Option<String>,
    /// Best-effort kind from the extension or the referencing element
    pub predicted: Option<AssetKind>,
    /// Off-scope entries are fetched but never expanded
    pub in_scope: bool,
    pub is_seed: bool,
}

impl FrontierEntry {
    /// The entry for the run's seed URL
    pub fn seed(url: Url) -> Self {
        Self {
            url,
            depth: 0,
            referrer: None,
            predicted: Some(AssetKind::Html),
            in_scope: true,
            is_seed: true,
        }
    }
}

/// Result of [`Frontier::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Already pushed during this run
    Duplicate,
    /// The run was cancelled or has drained
    Closed,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<FrontierEntry>,
    seen: HashSet<String>,
    in_flight: usize,
    closed: bool,
}

/// Concurrency-safe, deduplicating FIFO work queue
#[derive(Debug)]
pub struct Frontier {
    state: Mutex<State>,
    notify: Notify,
    cancel: CancelHandle,
}

/// An entry held by a worker; dropping it marks the entry as settled
#[derive(Debug)]
pub struct Lease<'a> {
    pub entry: FrontierEntry,
    frontier: &'a Frontier,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut state = self.frontier.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        let drained = state.in_flight == 0 && state.queue.is_empty();
        drop(state);

        if drained {
            self.frontier.notify.notify_waiters();
        }
    }
}

impl Frontier {
    pub fn new(cancel: CancelHandle) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queues an entry unless its URL was already pushed this run
    ///
    /// The membership check and the insert happen under one lock, so concurrent
    /// pushes of the same URL queue it exactly once.
    pub fn push(&self, entry: FrontierEntry) -> PushOutcome {
        let mut state = self.lock();
        if state.closed || self.cancel.is_cancelled() {
            return PushOutcome::Closed;
        }
        if !state.seen.insert(entry.url.as_str().to_string()) {
            return PushOutcome::Duplicate;
        }
        state.queue.push_back(entry);
        drop(state);

        self.notify.notify_waiters();
        PushOutcome::Queued
    }

    /// Waits for the next entry
    ///
    /// Returns `None` once the queue is empty and no entry is in flight, or when
    /// the run is cancelled.
    pub async fn pop(&self) -> Option<Lease<'_>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if self.cancel.is_cancelled() {
                    state.closed = true;
                    return None;
                }
                if let Some(entry) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(Lease {
                        entry,
                        frontier: self,
                    });
                }
                if state.in_flight == 0 {
                    state.closed = true;
                    drop(state);
                    self.notify.notify_waiters();
                    return None;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Number of entries waiting
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of distinct URLs pushed this run
    pub fn seen(&self) -> usize {
        self.lock().seen.len()
    }

    /// Returns true if the URL was pushed this run
    pub fn contains(&self, url: &str) -> bool {
        self.lock().seen.contains(url)
    }

    /// Marks a URL as seen without queueing it
    ///
    /// Redirect targets are recorded under the URL that led to them, so they
    /// must not be fetched a second time. Returns false if it was already seen.
    pub fn mark_seen(&self, url: &Url) -> bool {
        self.lock().seen.insert(url.as_str().to_string())
    }
}
