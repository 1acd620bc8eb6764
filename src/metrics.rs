use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

lazy_static! {
    // Lifecycle metrics
    pub static ref PAYMENTS_INITIATED: IntCounter = register_int_counter!(
        "payments_initiated_total",
        "Total number of payments initiated"
    ).unwrap();

    pub static ref PAYMENTS_COMPLETED: IntCounter = register_int_counter!(
        "payments_completed_total",
        "Total number of payments completed"
    ).unwrap();

    pub static ref PAYMENTS_FAILED: IntCounter = register_int_counter!(
        "payments_failed_total",
        "Total number of payments that ended in failure"
    ).unwrap();

    pub static ref PAYMENTS_CANCELLED: IntCounter = register_int_counter!(
        "payments_cancelled_total",
        "Total number of payments cancelled before settlement"
    ).unwrap();

    pub static ref PAYMENTS_REFUNDED: IntCounter = register_int_counter!(
        "payment_refunds_total",
        "Total number of refunds applied"
    ).unwrap();

    // Provider callback metrics
    pub static ref CALLBACKS_RECEIVED: IntCounter = register_int_counter!(
        "provider_callbacks_total",
        "Total number of provider callbacks received"
    ).unwrap();

    pub static ref CALLBACK_SIGNATURE_FAILURES: IntCounter = register_int_counter!(
        "provider_callback_signature_failures_total",
        "Total number of provider callbacks rejected for bad signatures"
    ).unwrap();

    pub static ref CALLBACK_REPLAYS: IntCounter = register_int_counter!(
        "provider_callback_replays_total",
        "Total number of provider callbacks absorbed as duplicates"
    ).unwrap();

    // Reconciliation metrics
    pub static ref RECONCILIATION_CONFLICTS: IntCounter = register_int_counter!(
        "reconciliation_conflicts_total",
        "Total number of provider callbacks that conflicted with a settled payment"
    ).unwrap();

    pub static ref SWEEP_RUNS: IntCounter = register_int_counter!(
        "reconciliation_sweep_runs_total",
        "Total number of reconciliation sweep passes"
    ).unwrap();

    pub static ref SWEEP_TIMEOUTS: IntCounter = register_int_counter!(
        "reconciliation_sweep_timeouts_total",
        "Total number of stale pending payments failed by the sweep"
    ).unwrap();

    // Concurrency metrics
    pub static ref VERSION_CONFLICTS: IntCounter = register_int_counter!(
        "payment_version_conflicts_total",
        "Total number of optimistic lock retries while applying payment events"
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
