//! Prometheus text exposition for `GET /metrics`

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Text exposition buffer; every sample carries the site label
struct Exposition<'a> {
    site: &'a str,
    out: String,
}

impl<'a> Exposition<'a> {
    fn new(site: &'a str) -> Self {
        Self { site, out: String::with_capacity(4096) }
    }

    fn header(&mut self, name: &str, help: &str, kind: &str) {
        let _ = writeln!(self.out, "# HELP {name} {help}\n# TYPE {name} {kind}");
    }

    fn counters(&mut self, rows: &[(&str, &str, u64)]) {
        for &(name, help, val) in rows {
            self.header(name, help, "counter");
            let _ = writeln!(self.out, "{name}{{site=\"{}\"}} {val}", self.site);
        }
    }

    fn gauge(&mut self, name: &str, help: &str, val: impl std::fmt::Display) {
        self.header(name, help, "gauge");
        let _ = writeln!(self.out, "{name}{{site=\"{}\"}} {val}", self.site);
    }

    /// Cumulative buckets; the last slot of `buckets` is the overflow bucket
    fn histogram(
        &mut self,
        name: &str,
        help: &str,
        buckets: &[u64; METRICS_NUM_BUCKETS],
        avg: u64,
    ) {
        self.header(name, help, "histogram");
        let site = self.site;
        let mut seen = 0u64;
        for (bound, count) in METRICS_BUCKET_BOUNDS.iter().zip(buckets.iter()) {
            seen += count;
            let _ = writeln!(self.out, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {seen}");
        }
        let total: u64 = buckets.iter().sum();
        let _ = writeln!(self.out, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {total}");
        let _ = writeln!(self.out, "{name}_sum{{site=\"{site}\"}} {}", avg * total);
        let _ = writeln!(self.out, "{name}_count{{site=\"{site}\"}} {total}");
    }
}

/// Render a metrics snapshot for `GET /metrics`
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut exp = Exposition::new(site_id);

    session_metrics(&mut exp, &summary);
    currency_metrics(&mut exp, &summary);
    line_metrics(&mut exp, &summary);

    exp.out
}

fn session_metrics(exp: &mut Exposition<'_>, summary: &MetricsSummary) {
    exp.counters(&[
        ("cash_sessions_started_total", "Amount requests accepted", summary.sessions_started),
        ("cash_sessions_completed_total", "Payments completed", summary.sessions_completed),
        (
            "cash_sessions_replaced_total",
            "Sessions discarded by a newer request",
            summary.sessions_replaced,
        ),
        ("cash_invalid_amounts_total", "Amount requests rejected", summary.invalid_amounts),
        ("cash_paid_cents_total", "Total paid across completed sessions", summary.paid_cents_total),
    ]);
}

fn currency_metrics(exp: &mut Exposition<'_>, summary: &MetricsSummary) {
    exp.counters(&[
        ("cash_bills_stacked_total", "Bills accepted and stacked", summary.bills_stacked),
        ("cash_bills_rejected_total", "Bills returned to the customer", summary.bills_rejected),
        (
            "cash_bills_suppressed_total",
            "Bill frames dropped as duplicate, settling or escrow echo",
            summary.bills_suppressed,
        ),
        ("cash_coins_accepted_total", "Coins credited", summary.coins_accepted),
        ("cash_coins_ignored_total", "Coins seen with no active session", summary.coins_ignored),
        ("cash_manual_credits_total", "Operator credits", summary.manual_credits),
        ("cash_noise_frames_total", "Frames that decode to nothing", summary.noise_frames),
        (
            "cash_change_commands_total",
            "Dispense commands sent to the hopper",
            summary.change_commands,
        ),
        (
            "cash_change_shortfall_cents_total",
            "Change that could not be dispensed",
            summary.change_shortfall_cents,
        ),
    ]);
}

fn line_metrics(exp: &mut Exposition<'_>, summary: &MetricsSummary) {
    exp.counters(&[
        ("cash_serial_write_errors_total", "Failed serial writes", summary.serial_write_errors),
        (
            "cash_frames_dropped_total",
            "Frames dropped on a full controller mailbox",
            summary.frames_dropped,
        ),
    ]);
    exp.gauge(
        "cash_frames_per_sec",
        "Frames handled per second since the last report",
        format_args!("{:.6}", summary.frames_per_sec),
    );
    exp.histogram(
        "cash_frame_latency_us",
        "Serial read to controller latency in microseconds",
        &summary.frame_lat_buckets,
        summary.frame_lat_avg_us,
    );
    exp.gauge(
        "cash_frame_latency_max_us",
        "Maximum frame latency since the last report",
        summary.frame_lat_max_us,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Money;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_session_started();
        metrics.record_session_completed(Money::from_cents(700));
        metrics.record_bill_stacked();
        metrics.record_frame_processed(150);
        metrics.record_frame_processed(250);

        let output = format_prometheus_metrics(&metrics, "terminal-1");

        assert!(output.contains("cash_sessions_completed_total{site=\"terminal-1\"} 1"));
        assert!(output.contains("cash_paid_cents_total{site=\"terminal-1\"} 700"));
        assert!(output.contains("cash_bills_stacked_total{site=\"terminal-1\"} 1"));
        assert!(output.contains("cash_frame_latency_us_bucket{site=\"terminal-1\",le=\"+Inf\"} 2"));
        assert!(output.contains("cash_frame_latency_us_count{site=\"terminal-1\"} 2"));
        assert!(output.contains("# TYPE cash_frame_latency_us histogram"));
    }
}
