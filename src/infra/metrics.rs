//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::{DenyReason, Verdict};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a consistent snapshot.
pub struct Metrics {
    /// Payloads received from scan sources (monotonic)
    scans_total: AtomicU64,
    /// Scans dropped by the debounce filter (monotonic)
    debounced_total: AtomicU64,
    /// Admitted verdicts (monotonic)
    admitted_total: AtomicU64,
    /// AlreadyUsed because of the registry attendance marker (monotonic)
    already_used_external_total: AtomicU64,
    /// AlreadyUsed because of the local ledger (monotonic)
    already_used_local_total: AtomicU64,
    /// Invalid verdicts (monotonic)
    invalid_total: AtomicU64,
    /// Decode failures reported by scan sources (monotonic)
    decode_failures_total: AtomicU64,
    /// Ledger read/write failures during decisions (monotonic)
    storage_errors_total: AtomicU64,
    /// Decisions since last report (reset on report)
    decisions_since_report: AtomicU64,
    /// Sum of decision latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max decision latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Decision latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_total: AtomicU64::new(0),
            debounced_total: AtomicU64::new(0),
            admitted_total: AtomicU64::new(0),
            already_used_external_total: AtomicU64::new(0),
            already_used_local_total: AtomicU64::new(0),
            invalid_total: AtomicU64::new(0),
            decode_failures_total: AtomicU64::new(0),
            storage_errors_total: AtomicU64::new(0),
            decisions_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a payload received from any scan source (lock-free)
    #[inline]
    pub fn record_scan(&self) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scan dropped by the debounce filter (lock-free)
    #[inline]
    pub fn record_debounced(&self) {
        self.debounced_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decided scan and its latency (lock-free)
    #[inline]
    pub fn record_verdict(&self, verdict: &Verdict, latency_us: u64) {
        let counter = match verdict {
            Verdict::Admitted(_) => &self.admitted_total,
            Verdict::AlreadyUsed(_, DenyReason::ExternalAttendance) => {
                &self.already_used_external_total
            }
            Verdict::AlreadyUsed(_, DenyReason::LocalLedger) => &self.already_used_local_total,
            Verdict::Invalid(_) => &self.invalid_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.decisions_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Record a decode failure from a scan source (lock-free)
    #[inline]
    pub fn record_decode_failure(&self) {
        self.decode_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a ledger failure during a decision (lock-free)
    #[inline]
    pub fn record_storage_error(&self) {
        self.storage_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn scans_total(&self) -> u64 {
        self.scans_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn admitted_total(&self) -> u64 {
        self.admitted_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn debounced_total(&self) -> u64 {
        self.debounced_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// so concurrent recorders are never blocked.
    pub fn report(&self) -> MetricsSummary {
        let decisions = self.decisions_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let decisions_per_sec = if elapsed.as_secs_f64() > 0.0 {
            decisions as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        self.summary(decisions, latency_sum, max_latency, lat_buckets, decisions_per_sec)
    }

    /// Current values without resetting anything (for scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        let decisions = self.decisions_since_report.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.load(Ordering::Relaxed);
        let max_latency = self.latency_max_us.load(Ordering::Relaxed);
        let lat_buckets = load_buckets(&self.latency_buckets);
        let elapsed = self.last_report_time.lock().elapsed();

        let decisions_per_sec = if elapsed.as_secs_f64() > 0.0 {
            decisions as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        self.summary(decisions, latency_sum, max_latency, lat_buckets, decisions_per_sec)
    }

    fn summary(
        &self,
        decisions: u64,
        latency_sum: u64,
        max_latency: u64,
        lat_buckets: [u64; NUM_BUCKETS],
        decisions_per_sec: f64,
    ) -> MetricsSummary {
        let avg_latency_us = if decisions > 0 { latency_sum / decisions } else { 0 };

        MetricsSummary {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            debounced_total: self.debounced_total.load(Ordering::Relaxed),
            admitted_total: self.admitted_total.load(Ordering::Relaxed),
            already_used_external_total: self.already_used_external_total.load(Ordering::Relaxed),
            already_used_local_total: self.already_used_local_total.load(Ordering::Relaxed),
            invalid_total: self.invalid_total.load(Ordering::Relaxed),
            decode_failures_total: self.decode_failures_total.load(Ordering::Relaxed),
            storage_errors_total: self.storage_errors_total.load(Ordering::Relaxed),
            decisions_per_sec,
            avg_latency_us,
            max_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at report time
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub scans_total: u64,
    pub debounced_total: u64,
    pub admitted_total: u64,
    pub already_used_external_total: u64,
    pub already_used_local_total: u64,
    pub invalid_total: u64,
    pub decode_failures_total: u64,
    pub storage_errors_total: u64,
    pub decisions_per_sec: f64,
    /// Average decision latency since last report (µs)
    pub avg_latency_us: u64,
    /// Max decision latency since last report (µs)
    pub max_latency_us: u64,
    /// Decision latency histogram buckets since last report
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
}

impl MetricsSummary {
    pub fn already_used_total(&self) -> u64 {
        self.already_used_external_total + self.already_used_local_total
    }

    /// Log the summary as one structured line
    pub fn log(&self) {
        info!(
            scans = %self.scans_total,
            admitted = %self.admitted_total,
            already_used = %self.already_used_total(),
            invalid = %self.invalid_total,
            debounced = %self.debounced_total,
            decode_failures = %self.decode_failures_total,
            storage_errors = %self.storage_errors_total,
            decisions_per_sec = format!("{:.2}", self.decisions_per_sec),
            avg_latency_us = %self.avg_latency_us,
            p99_us = %self.lat_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::GuestRecord;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.scans_total(), 0);
        assert_eq!(metrics.admitted_total(), 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(60000), 10);
    }

    #[test]
    fn test_record_verdicts_by_kind() {
        let metrics = Metrics::new();
        let ana = GuestRecord::new("A1", "Ana");

        metrics.record_verdict(&Verdict::Admitted(ana.clone()), 120);
        metrics.record_verdict(&Verdict::AlreadyUsed(ana.clone(), DenyReason::LocalLedger), 80);
        metrics.record_verdict(&Verdict::AlreadyUsed(ana, DenyReason::ExternalAttendance), 80);
        metrics.record_verdict(&Verdict::Invalid("Z9".to_string()), 40);

        let summary = metrics.report();
        assert_eq!(summary.admitted_total, 1);
        assert_eq!(summary.already_used_local_total, 1);
        assert_eq!(summary.already_used_external_total, 1);
        assert_eq!(summary.already_used_total(), 2);
        assert_eq!(summary.invalid_total, 1);
        assert_eq!(summary.avg_latency_us, 80);
        assert_eq!(summary.max_latency_us, 120);
    }

    #[test]
    fn test_report_resets_periodic_counters_only() {
        let metrics = Metrics::new();
        metrics.record_scan();
        metrics.record_verdict(&Verdict::Invalid(String::new()), 500);

        let first = metrics.report();
        assert_eq!(first.lat_buckets.iter().sum::<u64>(), 1);

        let second = metrics.report();
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 0);
        assert_eq!(second.max_latency_us, 0);
        // Monotonic counters survive the report
        assert_eq!(second.scans_total, 1);
        assert_eq!(second.invalid_total, 1);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_verdict(&Verdict::Invalid(String::new()), 500);

        assert_eq!(metrics.snapshot().lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(metrics.snapshot().lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(metrics.report().max_latency_us, 500);
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.99), 0);
    }
}
