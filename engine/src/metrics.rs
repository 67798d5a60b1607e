//! Business metrics for the reconciliation engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `slotledger_webhooks_total{provider,outcome}` - Webhook deliveries by final outcome
//! - `slotledger_capacity_changes_total{reason}` - Ledger writes by cause
//! - `slotledger_tickets_total{direction}` - Tickets sold, refunded and transferred
//! - `slotledger_refunds_total{provider}` - Refunds recorded
//! - `slotledger_refund_amount_cents_total` - Refunded money in cents
//! - `slotledger_transfers_total{status}` - Transfers applied or rejected
//! - `slotledger_provider_calls_total{provider,operation,status}` - Outbound provider calls
//! - `slotledger_notifications_failed_total` - Sale notifications that could not be delivered
//!
//! ## Histograms
//! - `slotledger_provider_call_duration_seconds{provider,operation}` - Provider call latency

use metrics::{describe_counter, describe_histogram};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    // Webhook metrics
    describe_counter!(
        "slotledger_webhooks_total",
        "Webhook deliveries by provider and outcome (processed, duplicate, ignored, no_verify, malformed, failed)"
    );

    // Ledger metrics
    describe_counter!(
        "slotledger_capacity_changes_total",
        "Capacity ledger writes by reason (sale, refund, transfer, manual, override, cancel)"
    );
    describe_counter!(
        "slotledger_tickets_total",
        "Tickets by direction (sold, refunded, transferred)"
    );

    // Refund metrics
    describe_counter!("slotledger_refunds_total", "Refunds recorded by provider");
    describe_counter!(
        "slotledger_refund_amount_cents_total",
        "Total refunded amount in cents"
    );

    // Transfer metrics
    describe_counter!(
        "slotledger_transfers_total",
        "Ticket transfers by status (applied, rejected)"
    );

    // Provider metrics
    describe_counter!(
        "slotledger_provider_calls_total",
        "Outbound payment provider calls by provider, operation and status"
    );
    describe_histogram!(
        "slotledger_provider_call_duration_seconds",
        "Latency of outbound payment provider calls"
    );

    describe_counter!(
        "slotledger_notifications_failed_total",
        "Sale notifications that failed to send"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the final outcome of a webhook delivery.
pub fn record_webhook(provider: &'static str, outcome: &'static str) {
    metrics::counter!("slotledger_webhooks_total", "provider" => provider, "outcome" => outcome)
        .increment(1);
    tracing::debug!(provider, outcome, "Recorded webhook metric");
}

/// Record one ledger write.
///
/// # Arguments
///
/// * `reason` - What moved capacity (e.g. "sale", "refund", "override")
pub fn record_capacity_change(reason: &'static str) {
    metrics::counter!("slotledger_capacity_changes_total", "reason" => reason).increment(1);
    tracing::debug!(reason, "Recorded capacity_change metric");
}

/// Record tickets moving in one direction.
pub fn record_tickets(direction: &'static str, quantity: u64) {
    metrics::counter!("slotledger_tickets_total", "direction" => direction).increment(quantity);
    tracing::debug!(direction, quantity, "Recorded tickets metric");
}

/// Record a refund.
///
/// # Arguments
///
/// * `provider` - Payment provider that issued it
/// * `amount_cents` - Refunded amount in cents
pub fn record_refund(provider: &'static str, amount_cents: i64) {
    metrics::counter!("slotledger_refunds_total", "provider" => provider).increment(1);
    metrics::counter!("slotledger_refund_amount_cents_total")
        .increment(amount_cents.unsigned_abs());
    tracing::debug!(provider, amount_cents, "Recorded refund metric");
}

/// Record a transfer attempt.
pub fn record_transfer(status: &'static str) {
    metrics::counter!("slotledger_transfers_total", "status" => status).increment(1);
    tracing::debug!(status, "Recorded transfer metric");
}

/// Record an outbound provider call.
///
/// # Arguments
///
/// * `status` - "ok" or "error"
/// * `duration_secs` - Wall time of the call in seconds
pub fn record_provider_call(
    provider: &'static str,
    operation: &'static str,
    status: &'static str,
    duration_secs: f64,
) {
    metrics::counter!(
        "slotledger_provider_calls_total",
        "provider" => provider,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "slotledger_provider_call_duration_seconds",
        "provider" => provider,
        "operation" => operation
    )
    .record(duration_secs);
    tracing::debug!(provider, operation, status, duration_secs, "Recorded provider_call metric");
}

/// Record a sale notification that could not be delivered.
pub fn record_notification_failed() {
    metrics::counter!("slotledger_notifications_failed_total").increment(1);
    tracing::debug!("Recorded notification_failed metric");
}
