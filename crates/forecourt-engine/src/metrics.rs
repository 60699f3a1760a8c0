//! Engine metrics, exposed read-only.
//!
//! Counters are atomics; latencies go into a bounded reservoir so the
//! percentile snapshot stays O(capacity) regardless of uptime.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use forecourt_core::types::Complexity;

const LATENCY_RESERVOIR_CAPACITY: usize = 1_024;

#[derive(Debug, Default)]
pub(crate) struct FlowMetrics {
    total_queries: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    overloaded: AtomicU64,
    invalid: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    simple: AtomicU64,
    standard: AtomicU64,
    complex: AtomicU64,
    critical: AtomicU64,
    revisions_on_approval: AtomicU64,
    approvals: AtomicU64,
    latencies_ms: Mutex<VecDeque<u64>>,
}

impl FlowMetrics {
    pub fn record_arrival(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_complexity(&self, complexity: Complexity) {
        let counter = match complexity {
            Complexity::Simple => &self.simple,
            Complexity::Standard => &self.standard,
            Complexity::Complex => &self.complex,
            Complexity::Critical => &self.critical,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, revisions_used: u32) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.approvals.fetch_add(1, Ordering::Relaxed);
        self.revisions_on_approval
            .fetch_add(revisions_used as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overloaded(&self) {
        self.overloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let mut latencies = self.latencies_ms.lock().expect("metrics lock poisoned");
        if latencies.len() == LATENCY_RESERVOIR_CAPACITY {
            latencies.pop_front();
        }
        latencies.push_back(elapsed.as_millis() as u64);
    }

    pub fn snapshot(&self, active_tasks: usize) -> MetricsSnapshot {
        let total = self.total_queries.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);

        let mut sorted: Vec<u64> = {
            let latencies = self.latencies_ms.lock().expect("metrics lock poisoned");
            latencies.iter().copied().collect()
        };
        sorted.sort_unstable();
        let mean = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        let approvals = self.approvals.load(Ordering::Relaxed);
        let mean_revisions = if approvals > 0 {
            self.revisions_on_approval.load(Ordering::Relaxed) as f64 / approvals as f64
        } else {
            0.0
        };

        let mut by_complexity = BTreeMap::new();
        by_complexity.insert("simple".to_string(), self.simple.load(Ordering::Relaxed));
        by_complexity.insert("standard".to_string(), self.standard.load(Ordering::Relaxed));
        by_complexity.insert("complex".to_string(), self.complex.load(Ordering::Relaxed));
        by_complexity.insert("critical".to_string(), self.critical.load(Ordering::Relaxed));

        MetricsSnapshot {
            total_queries: total,
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            cache_hits,
            cache_hit_rate: if total > 0 {
                cache_hits as f64 / total as f64
            } else {
                0.0
            },
            coalesced: self.coalesced.load(Ordering::Relaxed),
            by_complexity,
            latency_mean_ms: mean,
            latency_p50_ms: percentile(&sorted, 0.50),
            latency_p95_ms: percentile(&sorted, 0.95),
            mean_revisions_per_approval: mean_revisions,
            active_tasks,
        }
    }
}

fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Read-only metrics snapshot.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub overloaded: u64,
    pub invalid: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub coalesced: u64,
    pub by_complexity: BTreeMap<String, u64>,
    pub latency_mean_ms: f64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub mean_revisions_per_approval: f64,
    pub active_tasks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_over_reservoir() {
        let metrics = FlowMetrics::default();
        for ms in [10u64, 20, 30, 40, 100] {
            metrics.record_latency(Duration::from_millis(ms));
        }
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.latency_p50_ms, 30);
        assert_eq!(snapshot.latency_p95_ms, 100);
        assert!((snapshot.latency_mean_ms - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = FlowMetrics::default();
        metrics.record_arrival();
        metrics.record_arrival();
        metrics.record_cache_hit();
        let snapshot = metrics.snapshot(0);
        assert!((snapshot.cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_mean_revisions_per_approval() {
        let metrics = FlowMetrics::default();
        metrics.record_delivered(0);
        metrics.record_delivered(2);
        let snapshot = metrics.snapshot(0);
        assert!((snapshot.mean_revisions_per_approval - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reservoir_is_bounded() {
        let metrics = FlowMetrics::default();
        for _ in 0..(LATENCY_RESERVOIR_CAPACITY + 100) {
            metrics.record_latency(Duration::from_millis(5));
        }
        let latencies = metrics.latencies_ms.lock().unwrap();
        assert_eq!(latencies.len(), LATENCY_RESERVOIR_CAPACITY);
    }
}
