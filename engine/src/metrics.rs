//! Business metrics for the booking engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ferry_holds_total{outcome}` - Inventory hold attempts by outcome
//! - `ferry_bookings_total{status}` - Booking transitions by resulting status
//! - `ferry_ledger_postings_total{kind}` - Committed ledger transactions by kind
//! - `ferry_gateway_events_total{outcome}` - Webhook deliveries by outcome
//! - `ferry_alerts_total{kind}` - Fatal conditions (imbalance, bad signatures)
//! - `ferry_pending_confirmations_total` - Confirmations parked for replay
//!
//! ## Gauges
//! - `ferry_pending_confirmations` - Confirmations currently waiting for replay

use metrics::{describe_counter, describe_gauge};

/// Initialize and register all engine metric descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_engine_metrics() {
    describe_counter!(
        "ferry_holds_total",
        "Inventory hold attempts by outcome (held, no_capacity, seat_conflict, rejected)"
    );
    describe_counter!(
        "ferry_bookings_total",
        "Booking transitions by resulting status"
    );
    describe_counter!(
        "ferry_ledger_postings_total",
        "Committed ledger transactions by kind"
    );
    describe_counter!(
        "ferry_gateway_events_total",
        "Gateway webhook deliveries by outcome (applied, duplicate, rejected)"
    );
    describe_counter!(
        "ferry_alerts_total",
        "Conditions that require human attention"
    );
    describe_counter!(
        "ferry_pending_confirmations_total",
        "Confirmations parked after posting retries were exhausted"
    );
    describe_gauge!(
        "ferry_pending_confirmations",
        "Confirmations currently waiting for replay"
    );

    tracing::info!("Engine metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the outcome of a hold attempt.
pub fn record_hold(outcome: &'static str) {
    metrics::counter!("ferry_holds_total", "outcome" => outcome).increment(1);
}

/// Record a booking reaching `status`.
pub fn record_booking(status: &'static str) {
    metrics::counter!("ferry_bookings_total", "status" => status).increment(1);
    tracing::debug!(status, "Recorded booking metric");
}

/// Record a committed ledger transaction.
pub fn record_posting(kind: &'static str) {
    metrics::counter!("ferry_ledger_postings_total", "kind" => kind).increment(1);
}

/// Record a webhook delivery outcome.
pub fn record_gateway_event(outcome: &'static str) {
    metrics::counter!("ferry_gateway_events_total", "outcome" => outcome).increment(1);
}

/// Record a condition that must page someone.
pub fn record_alert(kind: &'static str) {
    metrics::counter!("ferry_alerts_total", "kind" => kind).increment(1);
}

/// Update the pending-confirmation gauge.
pub fn update_pending_confirmations(pending: usize) {
    metrics::gauge!("ferry_pending_confirmations").set(pending as f64);
}

/// Record a confirmation parked for replay.
pub fn record_pending_confirmation() {
    metrics::counter!("ferry_pending_confirmations_total").increment(1);
}
