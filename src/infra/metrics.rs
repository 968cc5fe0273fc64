//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for all counter updates; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector for the refresh loop
pub struct Metrics {
    /// Total successful refresh cycles (monotonic)
    refreshes_total: AtomicU64,
    /// Successful refreshes since last report (reset on report)
    refreshes_since_report: AtomicU64,
    /// Transient fetch failures (monotonic)
    transport_failures_total: AtomicU64,
    /// Malformed-response / unparseable-record cycles (monotonic)
    malformed_failures_total: AtomicU64,
    /// Authentication rejections (monotonic)
    auth_failures_total: AtomicU64,
    /// Check-ins newly folded into aggregates (monotonic)
    check_ins_accepted_total: AtomicU64,
    /// Sum of refresh latencies in milliseconds (reset on report)
    latency_sum_ms: AtomicU64,
    /// Max refresh latency in milliseconds (reset on report)
    latency_max_ms: AtomicU64,
    /// Process start, for uptime reporting
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            refreshes_total: AtomicU64::new(0),
            refreshes_since_report: AtomicU64::new(0),
            transport_failures_total: AtomicU64::new(0),
            malformed_failures_total: AtomicU64::new(0),
            auth_failures_total: AtomicU64::new(0),
            check_ins_accepted_total: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a successful refresh cycle
    pub fn record_refresh(&self, latency_ms: u64, accepted: u64) {
        self.refreshes_total.fetch_add(1, Ordering::Relaxed);
        self.refreshes_since_report.fetch_add(1, Ordering::Relaxed);
        self.check_ins_accepted_total.fetch_add(accepted, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_ms, latency_ms);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_failure(&self) {
        self.malformed_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Produce a summary and reset the per-interval counters
    pub fn report(&self) -> MetricsSummary {
        let since_report = self.refreshes_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_ms.swap(0, Ordering::Relaxed);
        let avg = if since_report > 0 { latency_sum / since_report } else { 0 };

        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
            refreshes_since_report: since_report,
            transport_failures_total: self.transport_failures_total.load(Ordering::Relaxed),
            malformed_failures_total: self.malformed_failures_total.load(Ordering::Relaxed),
            auth_failures_total: self.auth_failures_total.load(Ordering::Relaxed),
            check_ins_accepted_total: self.check_ins_accepted_total.load(Ordering::Relaxed),
            avg_refresh_latency_ms: avg,
            max_refresh_latency_ms: latency_max,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Consistent snapshot of metrics for logging and egress
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub refreshes_total: u64,
    pub refreshes_since_report: u64,
    pub transport_failures_total: u64,
    pub malformed_failures_total: u64,
    pub auth_failures_total: u64,
    pub check_ins_accepted_total: u64,
    pub avg_refresh_latency_ms: u64,
    pub max_refresh_latency_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = self.uptime_secs,
            refreshes_total = self.refreshes_total,
            refreshes_since_report = self.refreshes_since_report,
            transport_failures = self.transport_failures_total,
            malformed_failures = self.malformed_failures_total,
            auth_failures = self.auth_failures_total,
            check_ins_accepted = self.check_ins_accepted_total,
            avg_refresh_latency_ms = self.avg_refresh_latency_ms,
            max_refresh_latency_ms = self.max_refresh_latency_ms,
            "metrics_summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_refresh_accumulates() {
        let metrics = Metrics::new();
        metrics.record_refresh(120, 2);
        metrics.record_refresh(80, 0);

        let summary = metrics.report();
        assert_eq!(summary.refreshes_total, 2);
        assert_eq!(summary.refreshes_since_report, 2);
        assert_eq!(summary.check_ins_accepted_total, 2);
        assert_eq!(summary.avg_refresh_latency_ms, 100);
        assert_eq!(summary.max_refresh_latency_ms, 120);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_refresh(50, 1);
        let _ = metrics.report();

        let summary = metrics.report();
        assert_eq!(summary.refreshes_total, 1); // monotonic
        assert_eq!(summary.refreshes_since_report, 0); // reset
        assert_eq!(summary.avg_refresh_latency_ms, 0);
        assert_eq!(summary.max_refresh_latency_ms, 0);
    }

    #[test]
    fn test_failure_counters() {
        let metrics = Metrics::new();
        metrics.record_transport_failure();
        metrics.record_transport_failure();
        metrics.record_malformed_failure();
        metrics.record_auth_failure();

        let summary = metrics.report();
        assert_eq!(summary.transport_failures_total, 2);
        assert_eq!(summary.malformed_failures_total, 1);
        assert_eq!(summary.auth_failures_total, 1);
    }
}
