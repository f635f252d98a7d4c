//! In-process counters for pushdown decisions, scans, native calls and writes.
//!
//! Counters are lock-free atomics so they can be bumped on every page and row.
//! Per-resource call latency lives behind a mutex keyed by call label.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::predicates::PushdownSummary;

/// Per-label adapter call aggregates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceMetrics {
    /// Number of adapter calls issued under this label.
    pub calls: u64,
    /// Number of those calls that returned an error.
    pub failures: u64,
    /// Sum of call latency in nanoseconds.
    pub latency_ns: u64,
}

/// Aggregated counters for one connection.
#[derive(Debug, Default)]
pub struct HandlerMetrics {
    /// Predicates fully expressed by native parameters.
    pushdown_exact: AtomicU64,
    /// Predicates pushed as a superset and re-checked client-side.
    pushdown_inexact: AtomicU64,
    /// Predicates evaluated client-side only.
    pushdown_unsupported: AtomicU64,
    /// Queries translated into plans.
    scans: AtomicU64,
    /// Pages fetched from adapters across all scans.
    scan_pages: AtomicU64,
    /// Rows received from adapters before residual filtering.
    scan_rows_scanned: AtomicU64,
    /// Rows emitted to callers.
    scan_rows_returned: AtomicU64,
    /// Scans that ended because the limit was reached.
    scan_limit_stops: AtomicU64,
    /// Scans that ended on cancellation.
    scan_cancellations: AtomicU64,
    /// Queries rejected for a missing required native parameter.
    required_filter_rejects: AtomicU64,
    /// Passthrough operations executed.
    passthrough_calls: AtomicU64,
    /// Adapter calls across all kinds.
    native_calls: AtomicU64,
    /// Adapter calls that failed.
    native_call_failures: AtomicU64,
    /// Mutation statements executed.
    mutation_statements: AtomicU64,
    /// Rows reported as affected by mutations.
    mutation_rows_applied: AtomicU64,
    /// Mutation statements that ended in an error.
    mutation_failures: AtomicU64,
    /// Mutation statements stopped by cancellation.
    mutation_cancellations: AtomicU64,
    by_resource: Mutex<BTreeMap<String, ResourceMetrics>>,
}

/// Immutable snapshot view of [`HandlerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerMetricsSnapshot {
    pub pushdown_exact: u64,
    pub pushdown_inexact: u64,
    pub pushdown_unsupported: u64,
    pub scans: u64,
    pub scan_pages: u64,
    pub scan_rows_scanned: u64,
    pub scan_rows_returned: u64,
    pub scan_limit_stops: u64,
    pub scan_cancellations: u64,
    pub required_filter_rejects: u64,
    pub passthrough_calls: u64,
    pub native_calls: u64,
    pub native_call_failures: u64,
    pub mutation_statements: u64,
    pub mutation_rows_applied: u64,
    pub mutation_failures: u64,
    pub mutation_cancellations: u64,
}

impl HandlerMetrics {
    /// Records the pushdown classification of one translated query.
    pub fn record_pushdown(&self, summary: &PushdownSummary) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.pushdown_exact
            .fetch_add(summary.exact as u64, Ordering::Relaxed);
        self.pushdown_inexact
            .fetch_add(summary.inexact as u64, Ordering::Relaxed);
        self.pushdown_unsupported
            .fetch_add(summary.unsupported as u64, Ordering::Relaxed);
    }

    pub fn record_required_filter_reject(&self) {
        self.required_filter_rejects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one fetched page and the rows it carried.
    pub fn record_page(&self, rows: u64) {
        self.scan_pages.fetch_add(1, Ordering::Relaxed);
        self.scan_rows_scanned.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_row_returned(&self) {
        self.scan_rows_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_limit_stop(&self) {
        self.scan_limit_stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_cancelled(&self) {
        self.scan_cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one adapter call and its latency under `label`.
    pub fn record_native_call(&self, label: &str, latency: Duration, failed: bool) {
        let latency_ns = latency.as_nanos() as u64;
        self.native_calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.native_call_failures.fetch_add(1, Ordering::Relaxed);
        }
        let mut by_resource = self
            .by_resource
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = by_resource.entry(label.to_string()).or_default();
        entry.calls = entry.calls.saturating_add(1);
        entry.latency_ns = entry.latency_ns.saturating_add(latency_ns);
        if failed {
            entry.failures = entry.failures.saturating_add(1);
        }
    }

    /// Records the end of one mutation statement.
    pub fn record_mutation(&self, applied: u64, failed: bool, cancelled: bool) {
        self.mutation_statements.fetch_add(1, Ordering::Relaxed);
        self.mutation_rows_applied
            .fetch_add(applied, Ordering::Relaxed);
        if failed {
            self.mutation_failures.fetch_add(1, Ordering::Relaxed);
        }
        if cancelled {
            self.mutation_cancellations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Per-label call aggregates.
    pub fn resources(&self) -> BTreeMap<String, ResourceMetrics> {
        self.by_resource
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Captures a point-in-time copy of all counters.
    pub fn snapshot(&self) -> HandlerMetricsSnapshot {
        HandlerMetricsSnapshot {
            pushdown_exact: self.pushdown_exact.load(Ordering::Relaxed),
            pushdown_inexact: self.pushdown_inexact.load(Ordering::Relaxed),
            pushdown_unsupported: self.pushdown_unsupported.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            scan_pages: self.scan_pages.load(Ordering::Relaxed),
            scan_rows_scanned: self.scan_rows_scanned.load(Ordering::Relaxed),
            scan_rows_returned: self.scan_rows_returned.load(Ordering::Relaxed),
            scan_limit_stops: self.scan_limit_stops.load(Ordering::Relaxed),
            scan_cancellations: self.scan_cancellations.load(Ordering::Relaxed),
            required_filter_rejects: self.required_filter_rejects.load(Ordering::Relaxed),
            passthrough_calls: self.passthrough_calls.load(Ordering::Relaxed),
            native_calls: self.native_calls.load(Ordering::Relaxed),
            native_call_failures: self.native_call_failures.load(Ordering::Relaxed),
            mutation_statements: self.mutation_statements.load(Ordering::Relaxed),
            mutation_rows_applied: self.mutation_rows_applied.load(Ordering::Relaxed),
            mutation_failures: self.mutation_failures.load(Ordering::Relaxed),
            mutation_cancellations: self.mutation_cancellations.load(Ordering::Relaxed),
        }
    }

    /// Renders metrics as `name=value` lines.
    pub fn render_text(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            "pushdown_exact={}\npushdown_inexact={}\npushdown_unsupported={}\nscan_requests={}\nscan_pages={}\nscan_rows_scanned={}\nscan_rows_returned={}\nscan_limit_stops={}\nscan_cancellations={}\nrequired_filter_rejects={}\npassthrough_calls={}\nnative_calls={}\nnative_call_failures={}\nmutation_statements={}\nmutation_rows_applied={}\nmutation_failures={}\nmutation_cancellations={}\n",
            s.pushdown_exact,
            s.pushdown_inexact,
            s.pushdown_unsupported,
            s.scans,
            s.scan_pages,
            s.scan_rows_scanned,
            s.scan_rows_returned,
            s.scan_limit_stops,
            s.scan_cancellations,
            s.required_filter_rejects,
            s.passthrough_calls,
            s.native_calls,
            s.native_call_failures,
            s.mutation_statements,
            s.mutation_rows_applied,
            s.mutation_failures,
            s.mutation_cancellations,
        );
        for (label, metrics) in self.resources() {
            out.push_str(&format!(
                "native_call_{label}_calls={}\nnative_call_{label}_failures={}\nnative_call_{label}_latency_ns={}\n",
                metrics.calls, metrics.failures, metrics.latency_ns,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_text_includes_per_resource_lines() {
        let metrics = HandlerMetrics::default();
        metrics.record_pushdown(&PushdownSummary {
            exact: 2,
            inexact: 1,
            unsupported: 0,
        });
        metrics.record_page(20);
        metrics.record_native_call("fetch_transactions", Duration::from_millis(3), false);
        metrics.record_native_call("fetch_transactions", Duration::from_millis(1), true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pushdown_exact, 2);
        assert_eq!(snapshot.native_call_failures, 1);

        let text = metrics.render_text();
        assert!(text.contains("pushdown_inexact=1\n"), "{text}");
        assert!(text.contains("scan_rows_scanned=20\n"), "{text}");
        assert!(text.contains("native_call_fetch_transactions_calls=2\n"), "{text}");
        assert!(text.contains("native_call_fetch_transactions_failures=1\n"), "{text}");
    }
}
