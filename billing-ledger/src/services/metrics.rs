//! Prometheus metrics for billing-ledger.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Stock adjustments by reason and outcome.
pub static STOCK_ADJUSTMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_stock_adjustments_total",
        "Total number of stock adjustments attempted",
        &["reason", "status"]
    )
    .expect("Failed to register stock_adjustments_total")
});

/// Invoice writes by type and operation (create, issue, cancel, edit).
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoices_total",
        "Total number of invoice writes",
        &["invoice_type", "operation"]
    )
    .expect("Failed to register invoices_total")
});

/// Payments recorded or voided, by direction.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payments_total",
        "Total number of payment writes",
        &["direction", "operation"]
    )
    .expect("Failed to register payments_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors by type",
        &["operation", "error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Party balances whose projection disagreed with a recomputation.
pub static BALANCE_DRIFT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_balance_drift_total",
        "Total number of party balance projections found out of sync",
        &["repaired"]
    )
    .expect("Failed to register balance_drift_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&STOCK_ADJUSTMENTS_TOTAL);
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&BALANCE_DRIFT_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_families_are_exported() {
        init_metrics();
        ERRORS_TOTAL
            .with_label_values(&["record_payment", "over_applied"])
            .inc();

        let text = get_metrics();
        assert!(text.contains("billing_errors_total"));
        assert!(text.contains("error_type=\"over_applied\""));
    }
}
