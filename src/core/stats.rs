//! Recent request counts for diagnostics.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::api::{HttpMethod, OperationDescriptor};

/// How far back [`RequestLog::stats`] looks.
pub const STATS_WINDOW: Duration = Duration::from_secs(60);

/// Requests sent during the last [`STATS_WINDOW`], broken down by method and
/// by endpoint path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RequestStats {
    pub window_secs: u64,
    pub recent_requests: usize,
    pub by_method: BTreeMap<String, usize>,
    pub by_endpoint: BTreeMap<String, usize>,
}

/// Sliding log of sent requests, pruned to [`STATS_WINDOW`].
///
/// Every admitted attempt is recorded, retries included. The log holds at
/// most one window of entries, which the token bucket already bounds.
#[derive(Debug, Default)]
pub struct RequestLog {
    entries: Mutex<VecDeque<(Instant, HttpMethod, String)>>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &OperationDescriptor) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut entries, now);
        entries.push_back((now, operation.method, operation.path.clone()));
    }

    pub fn stats(&self) -> RequestStats {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut entries, Instant::now());

        let mut stats = RequestStats {
            window_secs: STATS_WINDOW.as_secs(),
            recent_requests: entries.len(),
            ..RequestStats::default()
        };
        for (_, method, path) in entries.iter() {
            *stats.by_method.entry(method.to_string()).or_default() += 1;
            *stats.by_endpoint.entry(path.clone()).or_default() += 1;
        }
        stats
    }
}

fn prune(entries: &mut VecDeque<(Instant, HttpMethod, String)>, now: Instant) {
    while let Some((at, _, _)) = entries.front() {
        if now.saturating_duration_since(*at) < STATS_WINDOW {
            break;
        }
        entries.pop_front();
    }
}
