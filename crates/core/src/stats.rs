//! Manager statistics
//!
//! Counters are plain atomics bumped on the hot paths; [`ManagerStats`] is
//! a copy taken on demand.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters since the manager was created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Entries currently held
    pub entries: usize,
    /// Producer runs started (one per generation, not per attempt)
    pub fetches_started: u64,
    /// Requests answered by joining a pending fetch
    pub deduplicated: u64,
    /// Requests answered from a fresh or recently settled entry
    pub cache_hits: u64,
    /// Retries sanctioned by the retry policy
    pub retries: u64,
    pub successes: u64,
    pub failures: u64,
    /// Completions dropped because their generation was superseded
    pub stale_discards: u64,
    pub evictions: u64,
}

impl ManagerStats {
    /// Share of requests that did not start a fetch
    pub fn hit_rate(&self) -> f64 {
        let total = self.fetches_started + self.deduplicated + self.cache_hits;
        if total == 0 {
            0.0
        } else {
            (self.deduplicated + self.cache_hits) as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    fetches_started: AtomicU64,
    deduplicated: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    stale_discards: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCollector {
    pub(crate) fn record_fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settled(&self, success: bool) {
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_stale_discard(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize) -> ManagerStats {
        ManagerStats {
            entries,
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
