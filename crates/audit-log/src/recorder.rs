use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::debug;

use crate::entry::AuditEntry;

/// Default cap on retained entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default number of resources reported in [`AuditStats::top_denied_resources`].
pub const DEFAULT_TOP_DENIED: usize = 10;

/// Append-only, bounded, in-memory log of decisions.
///
/// When the log grows past `max_entries` it is trimmed in one batch down to
/// `max_entries / 2` (at least one), keeping the entries with the newest
/// timestamps.
#[derive(Debug)]
pub struct AuditRecorder {
    entries: Mutex<Vec<AuditEntry>>,
    max_entries: usize,
    top_denied: usize,
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

/// Aggregate view over a window of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditStats {
    pub total_requests: usize,
    pub allowed_requests: usize,
    pub denied_requests: usize,
    pub average_latency_ms: f64,
    pub top_denied_resources: Vec<ResourceCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceCount {
    pub resource: String,
    pub count: usize,
}

impl AuditRecorder {
    /// Create a recorder retaining at most `max_entries` entries. A cap of
    /// zero is raised to one.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_entries: max_entries.max(1),
            top_denied: DEFAULT_TOP_DENIED,
        }
    }

    /// Set how many resources [`stats`](Self::stats) reports.
    pub fn with_top_denied(mut self, n: usize) -> Self {
        self.top_denied = n;
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry, trimming the log if it exceeds the cap.
    pub fn record(&self, entry: AuditEntry) {
        let mut entries = self.lock();
        entries.push(entry);

        if entries.len() > self.max_entries {
            let keep = (self.max_entries / 2).max(1);
            // Concurrent appenders may land slightly out of timestamp order;
            // order by timestamp so nothing newer than a survivor is dropped.
            entries.sort_by_key(|e| e.timestamp);
            let drop = entries.len() - keep;
            entries.drain(..drop);
            debug!(dropped = drop, retained = keep, "trimmed audit log");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entries recorded within the last `window`.
    pub fn query(&self, window: Duration) -> Vec<AuditEntry> {
        self.query_since(cutoff(Utc::now(), window))
    }

    /// Entries with a timestamp at or after `cutoff`, in log order.
    pub fn query_since(&self, cutoff: DateTime<Utc>) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Aggregate statistics over the last `window`.
    pub fn stats(&self, window: Duration) -> AuditStats {
        self.stats_since(cutoff(Utc::now(), window))
    }

    /// Aggregate statistics over entries at or after `cutoff`.
    pub fn stats_since(&self, cutoff: DateTime<Utc>) -> AuditStats {
        let entries = self.lock();
        let recent = entries.iter().filter(|e| e.timestamp >= cutoff);

        let mut total = 0usize;
        let mut allowed = 0usize;
        let mut latency_sum = 0u128;
        // (resource, count) in first-seen order, with an index for lookups.
        let mut denied: Vec<ResourceCount> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for entry in recent {
            total += 1;
            latency_sum += u128::from(entry.decision.metadata.latency_micros);
            if entry.decision.allowed {
                allowed += 1;
                continue;
            }
            let resource = entry.request.resource.as_str();
            match index.get(resource) {
                Some(&i) => denied[i].count += 1,
                None => {
                    index.insert(resource, denied.len());
                    denied.push(ResourceCount {
                        resource: resource.to_string(),
                        count: 1,
                    });
                }
            }
        }

        // Stable sort keeps first-seen order among equal counts.
        denied.sort_by(|a, b| b.count.cmp(&a.count));
        denied.truncate(self.top_denied);

        let average_latency_ms = if total > 0 {
            latency_sum as f64 / total as f64 / 1000.0
        } else {
            0.0
        };

        AuditStats {
            total_requests: total,
            allowed_requests: allowed,
            denied_requests: total - allowed,
            average_latency_ms,
            top_denied_resources: denied,
        }
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
