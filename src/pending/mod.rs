//! Table of in-flight requests keyed by correlation id.
//!
//! The table is a sharded [`DashMap`], so unrelated ids never contend on a
//! single lock. Every path that completes an entry first claims it by
//! removing it from the map (`remove` / `remove_if`). Whoever removes the
//! entry owns its completion slot and writes it exactly once; everyone else
//! finds nothing and backs off. The completion is sent after the shard lock
//! has been released.

mod slot;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{sync::oneshot, time::Instant};
use tracing::debug;

pub use self::slot::ReplySlot;
use crate::{
    correlation::CorrelationId,
    error::CallError,
    message::ReplyEnvelope,
    metrics,
};

/// Value written to a completion slot.
pub type Completion = Result<ReplyEnvelope, CallError>;

/// Registration number distinguishing successive entries for the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Bookkeeping for one request awaiting its reply.
#[derive(Debug)]
pub struct PendingEntry {
    ticket: Ticket,
    created_at: Instant,
    timeout: Duration,
    completion: oneshot::Sender<Completion>,
}

impl PendingEntry {
    /// Instant the request was registered.
    #[must_use]
    pub fn created_at(&self) -> Instant { self.created_at }

    /// Window the request was given.
    #[must_use]
    pub fn timeout(&self) -> Duration { self.timeout }

    /// Instant after which the request is abandoned.
    #[must_use]
    pub fn deadline(&self) -> Instant { self.created_at + self.timeout }

    fn complete(self, id: &CorrelationId, completion: Completion) {
        metrics::dec_pending();
        if self.completion.send(completion).is_err() {
            debug!(correlation_id = %id, "waiter went away before completion");
        }
    }
}

/// Counters describing table activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Resolutions that found no matching entry.
    pub unmatched: u64,
    /// Entries removed by expiry.
    pub expired: u64,
    /// Entries removed by cancellation or shutdown.
    pub cancelled: u64,
}

/// Concurrent map of pending requests.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: DashMap<CorrelationId, PendingEntry>,
    next_ticket: AtomicU64,
    unmatched: AtomicU64,
    expired: AtomicU64,
    cancelled: AtomicU64,
    closed: AtomicBool,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a pending request for `id`.
    ///
    /// The returned [`ReplySlot`] is the waiter side of the entry.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::DuplicateCorrelationId`] if `id` is already
    /// pending. The existing entry is left untouched. Returns
    /// [`CallError::Shutdown`] once [`PendingTable::close`] has been called.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{sync::Arc, time::Duration};
    ///
    /// use inout::{correlation::CorrelationId, error::CallError, pending::PendingTable};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let table = Arc::new(PendingTable::new());
    /// let id = CorrelationId::parse("abc123").expect("valid id");
    /// let _slot = table
    ///     .register(id.clone(), Duration::from_secs(1))
    ///     .expect("first registration succeeds");
    /// assert!(matches!(
    ///     table.register(id, Duration::from_secs(1)),
    ///     Err(CallError::DuplicateCorrelationId(_))
    /// ));
    /// # }
    /// ```
    pub fn register(self: &Arc<Self>, id: CorrelationId, timeout: Duration) -> Result<ReplySlot, CallError> {
        if self.is_closed() {
            return Err(CallError::Shutdown);
        }
        let (tx, rx) = oneshot::channel();
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let created_at = Instant::now();
        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CallError::DuplicateCorrelationId(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    ticket,
                    created_at,
                    timeout,
                    completion: tx,
                });
            }
        }
        metrics::inc_pending();
        // Insert first, then look at the flag: either this check sees the
        // close, or the close's sweep sees the entry.
        if self.closed.load(Ordering::SeqCst) {
            self.discard_ticket(&id, ticket);
            return Err(CallError::Shutdown);
        }
        debug!(correlation_id = %id, ?timeout, "request registered");
        Ok(ReplySlot::new(
            Arc::clone(self),
            id,
            ticket,
            created_at + timeout,
            timeout,
            rx,
        ))
    }

    /// Complete the entry for `id` with `reply`.
    ///
    /// Returns `false` if no entry was pending: the reply is late, a
    /// duplicate, or addressed to an unknown id. That case is counted and
    /// logged.
    pub fn resolve(&self, id: &CorrelationId, reply: ReplyEnvelope) -> bool {
        self.settle(id, Ok(reply))
    }

    /// Complete the entry for `id` with `error`.
    ///
    /// Follows the same contract as [`PendingTable::resolve`].
    pub fn fail(&self, id: &CorrelationId, error: CallError) -> bool { self.settle(id, Err(error)) }

    fn settle(&self, id: &CorrelationId, completion: Completion) -> bool {
        if let Some((id, entry)) = self.entries.remove(id) {
            entry.complete(&id, completion);
            true
        } else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %id, "no pending request; completion discarded");
            false
        }
    }

    /// Remove every entry whose deadline is at or before `now`.
    ///
    /// Each removed waiter observes [`CallError::RequestTimeout`]. The ids of
    /// the removed entries are returned.
    pub fn expire_older_than(&self, now: Instant) -> Vec<CorrelationId> {
        let candidates: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().deadline() <= now)
            .map(|entry| entry.key().clone())
            .collect();
        let mut expired = Vec::with_capacity(candidates.len());
        for id in candidates {
            // Re-check under the shard lock: the entry may have been resolved
            // and its id re-registered since the scan.
            if let Some((id, entry)) = self.entries.remove_if(&id, |_, entry| entry.deadline() <= now) {
                self.expire(&id, entry);
                expired.push(id);
            }
        }
        expired
    }

    /// Unregister `id`, completing its waiter with [`CallError::Cancelled`].
    ///
    /// Returns `false` if nothing was pending.
    pub fn remove(&self, id: &CorrelationId) -> bool {
        match self.entries.remove(id) {
            Some((id, entry)) => {
                self.cancel_entry(&id, entry);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending entry. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.remove(id)).count()
    }

    /// Refuse further registrations and cancel every pending entry.
    ///
    /// Returns how many entries were cancelled. Registrations racing the
    /// close either fail with [`CallError::Shutdown`] or are cancelled here;
    /// none survive it.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_all()
    }

    /// Whether [`PendingTable::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    /// Whether `id` is currently pending.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool { self.entries.contains_key(id) }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no requests are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Snapshot the activity counters.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats {
            unmatched: self.unmatched.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Claim the entry for `id` only if it still belongs to `ticket`.
    pub(crate) fn claim(&self, id: &CorrelationId, ticket: Ticket) -> Option<PendingEntry> {
        self.entries
            .remove_if(id, |_, entry| entry.ticket == ticket)
            .map(|(_, entry)| entry)
    }

    /// Cancel the entry for `id` on behalf of the registration `ticket`.
    pub(crate) fn cancel_ticket(&self, id: &CorrelationId, ticket: Ticket) -> bool {
        match self.claim(id, ticket) {
            Some(entry) => {
                self.cancel_entry(id, entry);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without completing it, on behalf of the
    /// registration `ticket`. Used when the request never left the process.
    pub(crate) fn discard_ticket(&self, id: &CorrelationId, ticket: Ticket) -> bool {
        match self.claim(id, ticket) {
            Some(_) => {
                metrics::dec_pending();
                debug!(correlation_id = %id, "pending request rolled back");
                true
            }
            None => false,
        }
    }

    /// Time out the entry for `id` on behalf of the registration `ticket`.
    pub(crate) fn expire_ticket(&self, id: &CorrelationId, ticket: Ticket) -> bool {
        match self.claim(id, ticket) {
            Some(entry) => {
                self.expire(id, entry);
                true
            }
            None => false,
        }
    }

    fn expire(&self, id: &CorrelationId, entry: PendingEntry) {
        self.expired.fetch_add(1, Ordering::Relaxed);
        metrics::inc_timeouts();
        let timeout = entry.timeout;
        entry.complete(
            id,
            Err(CallError::RequestTimeout {
                correlation_id: id.clone(),
                timeout,
            }),
        );
    }

    fn cancel_entry(&self, id: &CorrelationId, entry: PendingEntry) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        metrics::inc_cancellations();
        entry.complete(id, Err(CallError::Cancelled(id.clone())));
    }
}
