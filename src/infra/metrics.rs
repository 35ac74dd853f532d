//! Cash gateway counters and periodic reporting
//!
//! Session, currency and line counters are monotonic. Frame latency is drained
//! on every report, so `frames_per_sec` and the histogram cover one interval.
//!
//! NOTE: Relaxed ordering throughout. These are statistics; never branch on them.

use crate::domain::Money;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Frame latency bucket bounds (microseconds). Frames queue behind hold and
/// dispense delays, so the upper buckets reach into hundreds of milliseconds.
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [250, 500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000];
/// One bucket per bound plus the overflow bucket
pub const METRICS_NUM_BUCKETS: usize = METRICS_BUCKET_BOUNDS.len() + 1;

/// Read-to-controller latency, drained on every report
struct LatencyHistogram {
    count: AtomicU64,
    sum_us: AtomicU64,
    max_us: AtomicU64,
    buckets: [AtomicU64; METRICS_NUM_BUCKETS],
}

/// What a drained histogram held
struct LatencySnapshot {
    count: u64,
    sum_us: u64,
    max_us: u64,
    buckets: [u64; METRICS_NUM_BUCKETS],
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn bucket_index(latency_us: u64) -> usize {
        METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
    }

    fn record(&self, latency_us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.buckets[Self::bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    fn drain(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count.swap(0, Ordering::Relaxed),
            sum_us: self.sum_us.swap(0, Ordering::Relaxed),
            max_us: self.max_us.swap(0, Ordering::Relaxed),
            buckets: std::array::from_fn(|i| self.buckets[i].swap(0, Ordering::Relaxed)),
        }
    }
}

impl LatencySnapshot {
    fn avg_us(&self) -> u64 {
        self.sum_us.checked_div(self.count).unwrap_or(0)
    }

    /// Bound of the bucket holding the given quantile; overflow reports twice
    /// the last bound
    fn quantile_us(&self, quantile: f64) -> u64 {
        let total: u64 = self.buckets.iter().sum();
        if total == 0 {
            return 0;
        }
        let rank = ((total as f64 * quantile).ceil() as u64).max(1);
        let overflow = METRICS_BUCKET_BOUNDS[METRICS_BUCKET_BOUNDS.len() - 1] * 2;
        let mut seen = 0u64;
        for (i, &n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= rank {
                return METRICS_BUCKET_BOUNDS.get(i).copied().unwrap_or(overflow);
            }
        }
        overflow
    }
}

/// Shared by the serial tasks, the controller and the HTTP server
pub struct Metrics {
    /// Amount requests accepted (monotonic)
    sessions_started: AtomicU64,
    /// Sessions that reached their target (monotonic)
    sessions_completed: AtomicU64,
    /// Sessions discarded by a newer amount request (monotonic)
    sessions_replaced: AtomicU64,
    /// Amount requests rejected as invalid (monotonic)
    invalid_amounts: AtomicU64,
    /// Total credited across completed sessions, in cents (monotonic)
    paid_cents_total: AtomicU64,
    bills_stacked: AtomicU64,
    bills_rejected: AtomicU64,
    /// Bill frames dropped by debounce, settle window or escrow echo
    bills_suppressed: AtomicU64,
    coins_accepted: AtomicU64,
    /// Coins seen while no session was active
    coins_ignored: AtomicU64,
    manual_credits: AtomicU64,
    /// Frames that decode to nothing
    noise_frames: AtomicU64,
    change_commands: AtomicU64,
    /// Change the hopper could not pay out, in cents
    change_shortfall_cents: AtomicU64,
    serial_write_errors: AtomicU64,
    /// Frames dropped because the controller mailbox was full
    frames_dropped: AtomicU64,
    /// Frames handled since last report, with their latency
    frame_latency: LatencyHistogram,
    /// Start of the current reporting interval
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_replaced: AtomicU64::new(0),
            invalid_amounts: AtomicU64::new(0),
            paid_cents_total: AtomicU64::new(0),
            bills_stacked: AtomicU64::new(0),
            bills_rejected: AtomicU64::new(0),
            bills_suppressed: AtomicU64::new(0),
            coins_accepted: AtomicU64::new(0),
            coins_ignored: AtomicU64::new(0),
            manual_credits: AtomicU64::new(0),
            noise_frames: AtomicU64::new(0),
            change_commands: AtomicU64::new(0),
            change_shortfall_cents: AtomicU64::new(0),
            serial_write_errors: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frame_latency: LatencyHistogram::new(),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_completed(&self, paid: Money) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        self.paid_cents_total.fetch_add(paid.cents().max(0) as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_replaced(&self) {
        self.sessions_replaced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_amount(&self) {
        self.invalid_amounts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bill_stacked(&self) {
        self.bills_stacked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bill_rejected(&self) {
        self.bills_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bill_suppressed(&self) {
        self.bills_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coin_accepted(&self) {
        self.coins_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coin_ignored(&self) {
        self.coins_ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_manual_credit(&self) {
        self.manual_credits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_noise_frame(&self) {
        self.noise_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_change_commands(&self, count: usize) {
        self.change_commands.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_change_shortfall(&self, remainder: Money) {
        self.change_shortfall_cents.fetch_add(remainder.cents().max(0) as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_serial_write_error(&self) {
        self.serial_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame reaching the controller `latency_us` after it was read
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64) {
        self.frame_latency.record(latency_us);
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.load(Ordering::Relaxed)
    }

    pub fn bills_stacked(&self) -> u64 {
        self.bills_stacked.load(Ordering::Relaxed)
    }

    pub fn bills_suppressed(&self) -> u64 {
        self.bills_suppressed.load(Ordering::Relaxed)
    }

    pub fn change_commands(&self) -> u64 {
        self.change_commands.load(Ordering::Relaxed)
    }

    /// Build a summary, resetting the periodic counters
    pub fn report(&self) -> MetricsSummary {
        let latency = self.frame_latency.drain();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            latency.count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_replaced: self.sessions_replaced.load(Ordering::Relaxed),
            invalid_amounts: self.invalid_amounts.load(Ordering::Relaxed),
            paid_cents_total: self.paid_cents_total.load(Ordering::Relaxed),
            bills_stacked: self.bills_stacked.load(Ordering::Relaxed),
            bills_rejected: self.bills_rejected.load(Ordering::Relaxed),
            bills_suppressed: self.bills_suppressed.load(Ordering::Relaxed),
            coins_accepted: self.coins_accepted.load(Ordering::Relaxed),
            coins_ignored: self.coins_ignored.load(Ordering::Relaxed),
            manual_credits: self.manual_credits.load(Ordering::Relaxed),
            noise_frames: self.noise_frames.load(Ordering::Relaxed),
            change_commands: self.change_commands.load(Ordering::Relaxed),
            change_shortfall_cents: self.change_shortfall_cents.load(Ordering::Relaxed),
            serial_write_errors: self.serial_write_errors.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_per_sec,
            frame_lat_avg_us: latency.avg_us(),
            frame_lat_max_us: latency.max_us,
            frame_lat_p99_us: latency.quantile_us(0.99),
            frame_lat_buckets: latency.buckets,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot produced by `Metrics::report`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_replaced: u64,
    pub invalid_amounts: u64,
    pub paid_cents_total: u64,
    pub bills_stacked: u64,
    pub bills_rejected: u64,
    pub bills_suppressed: u64,
    pub coins_accepted: u64,
    pub coins_ignored: u64,
    pub manual_credits: u64,
    pub noise_frames: u64,
    pub change_commands: u64,
    pub change_shortfall_cents: u64,
    pub serial_write_errors: u64,
    pub frames_dropped: u64,
    pub frames_per_sec: f64,
    /// Per-bucket frame counts, see `METRICS_BUCKET_BOUNDS`
    pub frame_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub frame_lat_avg_us: u64,
    pub frame_lat_max_us: u64,
    pub frame_lat_p99_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            sessions_started = %self.sessions_started,
            sessions_completed = %self.sessions_completed,
            paid_total = %Money::from_cents(self.paid_cents_total as i64),
            bills_stacked = %self.bills_stacked,
            bills_rejected = %self.bills_rejected,
            bills_suppressed = %self.bills_suppressed,
            coins_accepted = %self.coins_accepted,
            noise_frames = %self.noise_frames,
            change_cmds = %self.change_commands,
            serial_write_errors = %self.serial_write_errors,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            frame_p99_us = %self.frame_lat_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.sessions_completed(), 0);
        assert_eq!(metrics.bills_stacked(), 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(LatencyHistogram::bucket_index(50), 0);
        assert_eq!(LatencyHistogram::bucket_index(250), 0);
        assert_eq!(LatencyHistogram::bucket_index(251), 1);
        assert_eq!(LatencyHistogram::bucket_index(500_000), 10);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(150);
        metrics.record_frame_processed(250);
        metrics.record_bill_stacked();

        let summary = metrics.report();
        assert_eq!(summary.frame_lat_avg_us, 200);
        assert_eq!(summary.frame_lat_max_us, 250);
        assert_eq!(summary.frame_lat_buckets.iter().sum::<u64>(), 2);
        assert_eq!(summary.bills_stacked, 1);

        let summary = metrics.report();
        assert_eq!(summary.frame_lat_avg_us, 0);
        assert_eq!(summary.frame_lat_buckets.iter().sum::<u64>(), 0);
        // Monotonic counters survive a report
        assert_eq!(summary.bills_stacked, 1);
    }

    #[test]
    fn test_session_completed_accumulates_paid() {
        let metrics = Metrics::new();
        metrics.record_session_completed(Money::from_cents(700));
        metrics.record_session_completed(Money::from_cents(550));
        let summary = metrics.report();
        assert_eq!(summary.sessions_completed, 2);
        assert_eq!(summary.paid_cents_total, 1250);
    }

    #[test]
    fn test_latency_quantiles() {
        let histogram = LatencyHistogram::new();
        for _ in 0..98 {
            histogram.record(100);
        }
        histogram.record(8_000);
        histogram.record(8_000);
        let snapshot = histogram.drain();
        assert_eq!(snapshot.quantile_us(0.50), 250);
        assert_eq!(snapshot.quantile_us(0.99), 10_000);
        assert_eq!(snapshot.max_us, 8_000);

        histogram.record(1_000_000);
        assert_eq!(histogram.drain().quantile_us(0.99), 500_000);
    }
}
