//! Closeout metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `closeout_finalized_total` - Events moved to closed
//! - `closeout_rejected_total{reason}` - Finalize calls refused
//! - `closeout_payout_lines_total{outcome}` - Lines written or failed
//! - `closeout_side_effect_failures_total{kind}` - Best-effort failures
//! - `table_commission_runs_total` - Table commission calculations
//! - `table_commissions_written_total{operation}` - Records created, updated, skipped, failed
//!
//! ## Histograms
//! - `closeout_finalize_duration_seconds` - Finalize wall time

use metrics::{describe_counter, describe_histogram};

/// Register descriptions for all closeout metrics.
///
/// Call once at startup, before any metric is recorded.
pub fn register_closeout_metrics() {
    describe_counter!("closeout_finalized_total", "Events moved to closed");
    describe_counter!(
        "closeout_rejected_total",
        "Finalize calls refused, by reason (already_closed, finalize_in_progress, forbidden, ...)"
    );
    describe_counter!(
        "closeout_payout_lines_total",
        "Payout lines by outcome (written, failed)"
    );
    describe_counter!(
        "closeout_side_effect_failures_total",
        "Best-effort side effects that failed, by kind (statement, notification, domain_event)"
    );
    describe_histogram!(
        "closeout_finalize_duration_seconds",
        "Time taken by a successful finalize call"
    );
    describe_counter!(
        "table_commission_runs_total",
        "Table commission calculations completed"
    );
    describe_counter!(
        "table_commissions_written_total",
        "Table commission records by operation (created, updated, skipped_locked)"
    );

    tracing::info!("Closeout metrics registered");
}

pub(crate) fn record_finalized(duration_secs: f64) {
    metrics::counter!("closeout_finalized_total").increment(1);
    metrics::histogram!("closeout_finalize_duration_seconds").record(duration_secs);
}

pub(crate) fn record_rejected(reason: &'static str) {
    metrics::counter!("closeout_rejected_total", "reason" => reason).increment(1);
}

pub(crate) fn record_payout_line(outcome: &'static str) {
    metrics::counter!("closeout_payout_lines_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_side_effect_failure(kind: &'static str) {
    metrics::counter!("closeout_side_effect_failures_total", "kind" => kind).increment(1);
}

pub(crate) fn record_table_run(created: u64, updated: u64, skipped: u64, failed: u64) {
    metrics::counter!("table_commission_runs_total").increment(1);
    metrics::counter!("table_commissions_written_total", "operation" => "created")
        .increment(created);
    metrics::counter!("table_commissions_written_total", "operation" => "updated")
        .increment(updated);
    metrics::counter!("table_commissions_written_total", "operation" => "skipped_locked")
        .increment(skipped);
    metrics::counter!("table_commissions_written_total", "operation" => "failed")
        .increment(failed);
}
