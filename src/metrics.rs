//! Metric helpers for `inout`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the counter tracking requests handed to the transport.
pub const REQUESTS_SENT: &str = "inout_requests_sent_total";
/// Name of the gauge tracking requests awaiting a reply.
pub const PENDING_REQUESTS: &str = "inout_pending_requests";
/// Name of the counter tracking inbound replies by outcome.
pub const REPLIES_TOTAL: &str = "inout_replies_total";
/// Name of the counter tracking requests that timed out.
pub const TIMEOUTS_TOTAL: &str = "inout_request_timeouts_total";
/// Name of the counter tracking cancelled requests.
pub const CANCELLATIONS_TOTAL: &str = "inout_request_cancellations_total";
/// Name of the counter tracking rejected sends.
pub const SEND_FAILURES_TOTAL: &str = "inout_send_failures_total";

/// What happened to an inbound reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Delivered to its waiting caller.
    Delivered,
    /// Delivered to its waiting caller as a fault.
    Faulted,
    /// No pending request matched; discarded.
    Late,
    /// Missing or invalid correlation id; discarded.
    Malformed,
}

impl ReplyOutcome {
    /// Label value used when recording this outcome.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyOutcome::Delivered => "delivered",
            ReplyOutcome::Faulted => "faulted",
            ReplyOutcome::Late => "late",
            ReplyOutcome::Malformed => "malformed",
        }
    }
}

/// Record a request handed to the transport.
pub fn inc_requests() {
    #[cfg(feature = "metrics")]
    counter!(REQUESTS_SENT).increment(1);
}

/// Increment the pending requests gauge.
pub fn inc_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_REQUESTS).increment(1.0);
}

/// Decrement the pending requests gauge.
pub fn dec_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_REQUESTS).decrement(1.0);
}

/// Record an inbound reply with the given outcome.
pub fn inc_replies(outcome: ReplyOutcome) {
    #[cfg(feature = "metrics")]
    counter!(REPLIES_TOTAL, "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record a request that timed out.
pub fn inc_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(TIMEOUTS_TOTAL).increment(1);
}

/// Record a cancelled request.
pub fn inc_cancellations() {
    #[cfg(feature = "metrics")]
    counter!(CANCELLATIONS_TOTAL).increment(1);
}

/// Record a send rejected by the transport.
pub fn inc_send_failures() {
    #[cfg(feature = "metrics")]
    counter!(SEND_FAILURES_TOTAL).increment(1);
}
