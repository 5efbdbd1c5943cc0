//! Consumer side of the correlation engine.
//!
//! A [`ReplyListener`] is subscribed to a reply destination. For every inbound
//! message it reads the correlation id, claims the matching pending entry and
//! hands the reply to the waiting caller. Malformed and unmatched replies are
//! logged, counted and dropped; the listener never fails because of them.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::{FutureExt, future};
use tracing::{debug, warn};

use crate::{
    correlation::Correlatable,
    error::{CallError, ReplyAnomaly},
    message::{Destination, FAULT_HEADER, Message, ReplyEnvelope},
    metrics::{self, ReplyOutcome},
    pending::PendingTable,
    transport::MessageHandler,
};

/// Counters describing what the listener did with inbound replies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Replies handed to their waiting caller.
    pub delivered: u64,
    /// Fault replies handed to their waiting caller.
    pub faulted: u64,
    /// Replies that matched no pending request.
    pub late: u64,
    /// Replies without a usable correlation id.
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    faulted: AtomicU64,
    late: AtomicU64,
    malformed: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: ReplyOutcome) {
        let counter = match outcome {
            ReplyOutcome::Delivered => &self.delivered,
            ReplyOutcome::Faulted => &self.faulted,
            ReplyOutcome::Late => &self.late,
            ReplyOutcome::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::inc_replies(outcome);
    }
}

/// Matches inbound replies to pending requests.
///
/// Cloning is cheap; clones share the table and the counters.
#[derive(Clone, Debug)]
pub struct ReplyListener {
    table: Arc<PendingTable>,
    counters: Arc<Counters>,
}

impl ReplyListener {
    /// Create a listener resolving entries in `table`.
    #[must_use]
    pub fn new(table: Arc<PendingTable>) -> Self {
        Self {
            table,
            counters: Arc::default(),
        }
    }

    /// Process one reply consumed from `source`.
    ///
    /// The payload is passed through untouched.
    pub fn on_message(&self, message: Message, source: &Destination) -> ReplyOutcome {
        let outcome = match message.correlation_id() {
            Ok(Some(id)) => {
                let resolved = match message.header(FAULT_HEADER) {
                    Some(reason) => {
                        let error = CallError::ReplyFault {
                            correlation_id: id.clone(),
                            reason: reason.to_owned(),
                        };
                        self.table.fail(&id, error).then_some(ReplyOutcome::Faulted)
                    }
                    None => {
                        let envelope = ReplyEnvelope::new(id.clone(), message, source.clone());
                        self.table
                            .resolve(&id, envelope)
                            .then_some(ReplyOutcome::Delivered)
                    }
                };
                resolved.unwrap_or_else(|| {
                    let anomaly = ReplyAnomaly::LateOrDuplicateReply {
                        correlation_id: id,
                        destination: source.clone(),
                    };
                    warn!(%anomaly, "discarding reply");
                    ReplyOutcome::Late
                })
            }
            Ok(None) => Self::malformed(source, "missing correlation id".to_owned()),
            Err(err) => Self::malformed(source, err.to_string()),
        };
        debug!(destination = %source, outcome = outcome.as_str(), "reply processed");
        self.counters.record(outcome);
        outcome
    }

    fn malformed(source: &Destination, reason: String) -> ReplyOutcome {
        let anomaly = ReplyAnomaly::MalformedReply {
            destination: source.clone(),
            reason,
        };
        warn!(%anomaly, "discarding reply");
        ReplyOutcome::Malformed
    }

    /// Build a transport handler that feeds messages from `source` into this
    /// listener.
    #[must_use]
    pub fn handler(&self, source: Destination) -> MessageHandler {
        let listener = self.clone();
        Arc::new(move |message| {
            listener.on_message(message, &source);
            future::ready(()).boxed()
        })
    }

    /// Snapshot the listener counters.
    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            faulted: self.counters.faulted.load(Ordering::Relaxed),
            late: self.counters.late.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }
}
