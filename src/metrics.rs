use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// Pre-register so series appear before the first increment.
pub fn register_metrics() {
    counter!("ledger_transactions_total", "kind" => "deposit").absolute(0);
    counter!("ledger_conflict_retries_total").absolute(0);
    for kind in ["position", "allocation"] {
        counter!("accrual_items_succeeded_total", "kind" => kind).absolute(0);
        counter!("accrual_items_failed_total", "kind" => kind).absolute(0);
        counter!("accrual_items_skipped_total", "kind" => kind).absolute(0);
    }
    counter!("positions_completed_total").absolute(0);
    counter!("allocations_deactivated_total").absolute(0);

    gauge!("accrual_last_run_timestamp_seconds").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("accrual_cycle_seconds").record(0.0);
}
