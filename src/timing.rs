//! Record of completed network fetches, used to confirm that a real round trip
//! happened for targets the timing heuristic could not classify.
//!
//! Every scan owns one record. Channels append an entry to it whenever a fetch
//! finishes. An entry whose two timestamps differ means response bytes arrived.
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;

/// One completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingEntry {
    pub name: String,
    pub fetch_start: Instant,
    pub response_end: Instant,
}

impl TimingEntry {
    /// True when the fetch received at least part of a response.
    pub fn transferred(&self) -> bool {
        self.fetch_start != self.response_end
    }
}

/// Append-only timing record of one scan. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct TimingStore {
    entries: Arc<Mutex<Vec<TimingEntry>>>,
}

impl TimingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fetch of `name`. Pass `response_end = None` when nothing came
    /// back.
    pub fn record(&self, name: impl Into<String>, fetch_start: Instant, response_end: Option<Instant>) {
        let entry = TimingEntry {
            name: name.into(),
            fetch_start,
            response_end: response_end.unwrap_or(fetch_start),
        };
        self.lock().push(entry);
    }

    /// Snapshot of all resource fetch entries.
    pub fn resource_entries(&self) -> Vec<TimingEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TimingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Brings a URL into the form used for matching: any scheme becomes `http://`
/// and a trailing slash is dropped.
pub fn normalize_address(address: &str) -> String {
    let rest = address
        .split_once("://")
        .map_or(address, |(_, rest)| rest);
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    format!("http://{rest}")
}
