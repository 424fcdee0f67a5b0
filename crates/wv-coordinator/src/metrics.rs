//! Coordinator metrics.
//!
//! Counters for claim outcomes, compensating rollbacks and exhausted retry
//! bounds. They complement the structured logs emitted along the same paths.

use metrics::{counter, describe_counter};

/// Claim attempts by outcome (`claimed`, `collision`, `contended`)
pub const CLAIMS: &str = "weave_claims_total";

/// Compensating rollbacks after a failed publish
pub const ROLLBACKS: &str = "weave_rollbacks_total";

/// Operations that ran out of attempts
pub const RETRY_EXHAUSTED: &str = "weave_retry_exhausted_total";

/// Registers all coordinator metric descriptions.
///
/// Call this once at startup after installing the recorder.
pub fn register_metrics() {
    describe_counter!(CLAIMS, "Total claim attempts by outcome");
    describe_counter!(ROLLBACKS, "Total compensating rollbacks after publish failures");
    describe_counter!(RETRY_EXHAUSTED, "Total operations that exhausted their retry bound");
}

pub fn record_claim(scope: &str, outcome: &'static str) {
    counter!(CLAIMS, "scope" => scope.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_rollback(scope: &str) {
    counter!(ROLLBACKS, "scope" => scope.to_string()).increment(1);
}

pub fn record_retry_exhausted(operation: &str) {
    counter!(RETRY_EXHAUSTED, "operation" => operation.to_string()).increment(1);
}
