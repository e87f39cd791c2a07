//! Counters for the link validation pipeline.
//!
//! An optional [`LinkMetrics`] sink can be installed on the formatter; the
//! validator increments per-outcome counters and the HTTP probe reports
//! per-host request counts and accumulated latency through the
//! [`ProbeObserver`](crate::probe::ProbeObserver) hook.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct LinkMetrics {
    local_links_checked: AtomicU64,
    remote_links_checked: AtomicU64,
    round_trip_visited: AtomicU64,
    round_trip_cached: AtomicU64,
    github_skipped: AtomicU64,
    ignore_skipped: AtomicU64,
    per_host: Mutex<HashMap<String, HostStats>>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct HostStats {
    pub requests: u64,
    pub total_latency_ms: u64,
}

/// Point-in-time copy of all counters, suitable for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub local_links_checked: u64,
    pub remote_links_checked: u64,
    pub round_trip_visited: u64,
    pub round_trip_cached: u64,
    pub github_skipped: u64,
    pub ignore_skipped: u64,
    pub per_host: HashMap<String, HostStats>,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_local_checked(&self) {
        self.local_links_checked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_remote_checked(&self) {
        self.remote_links_checked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_round_trip_visited(&self) {
        self.round_trip_visited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_round_trip_cached(&self) {
        self.round_trip_cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_github_skipped(&self) {
        self.github_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ignore_skipped(&self) {
        self.ignore_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one HTTP request against a host.
    pub fn observe_request(&self, host: &str, latency: Duration) {
        let mut hosts = self.per_host.lock().expect("metrics lock poisoned");
        let stats = hosts.entry(host.to_string()).or_default();
        stats.requests += 1;
        stats.total_latency_ms += latency.as_millis() as u64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            local_links_checked: self.local_links_checked.load(Ordering::Relaxed),
            remote_links_checked: self.remote_links_checked.load(Ordering::Relaxed),
            round_trip_visited: self.round_trip_visited.load(Ordering::Relaxed),
            round_trip_cached: self.round_trip_cached.load(Ordering::Relaxed),
            github_skipped: self.github_skipped.load(Ordering::Relaxed),
            ignore_skipped: self.ignore_skipped.load(Ordering::Relaxed),
            per_host: self.per_host.lock().expect("metrics lock poisoned").clone(),
        }
    }
}

impl crate::probe::ProbeObserver for LinkMetrics {
    fn observe(&self, host: &str, _status: Option<u16>, latency: Duration) {
        self.observe_request(host, latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let m = LinkMetrics::new();
        m.inc_local_checked();
        m.inc_local_checked();
        m.inc_remote_checked();
        m.inc_round_trip_cached();
        m.observe_request("example.com", Duration::from_millis(120));
        m.observe_request("example.com", Duration::from_millis(30));

        let snap = m.snapshot();
        assert_eq!(snap.local_links_checked, 2);
        assert_eq!(snap.remote_links_checked, 1);
        assert_eq!(snap.round_trip_cached, 1);
        let host = &snap.per_host["example.com"];
        assert_eq!(host.requests, 2);
        assert_eq!(host.total_latency_ms, 150);
    }
}
