//! Waiter side of a pending entry.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{sync::oneshot, time::Instant};

use super::{Completion, PendingTable, Ticket};
use crate::{correlation::CorrelationId, error::CallError};

/// Single-assignment completion slot for one registered request.
///
/// Awaiting the slot directly waits until some resolver writes it.
/// [`ReplySlot::wait`] additionally enforces the request deadline. Dropping
/// an unresolved slot withdraws its entry from the table so abandoned
/// waiters never leak.
#[must_use = "dropping a ReplySlot withdraws the pending request"]
#[derive(Debug)]
pub struct ReplySlot {
    table: Arc<PendingTable>,
    id: CorrelationId,
    ticket: Ticket,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Completion>,
    settled: bool,
}

impl ReplySlot {
    pub(super) fn new(
        table: Arc<PendingTable>,
        id: CorrelationId,
        ticket: Ticket,
        deadline: Instant,
        timeout: Duration,
        rx: oneshot::Receiver<Completion>,
    ) -> Self {
        Self {
            table,
            id,
            ticket,
            deadline,
            timeout,
            rx,
            settled: false,
        }
    }

    /// Correlation id of the pending request.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId { &self.id }

    /// Instant after which the request times out.
    #[must_use]
    pub fn deadline(&self) -> Instant { self.deadline }

    /// Window the request was given.
    #[must_use]
    pub fn timeout(&self) -> Duration { self.timeout }

    pub(crate) fn ticket(&self) -> Ticket { self.ticket }

    /// Wait for the completion, timing out at the deadline.
    ///
    /// When the deadline passes the slot claims its own entry through the
    /// table. If a reply (or the reaper) claimed it first, that completion is
    /// returned instead.
    ///
    /// # Errors
    ///
    /// Returns the error written to the slot: [`CallError::RequestTimeout`],
    /// [`CallError::Cancelled`], or a reply fault.
    pub async fn wait(mut self) -> Completion {
        if let Ok(completion) = tokio::time::timeout_at(self.deadline, &mut self).await {
            return completion;
        }
        self.table.expire_ticket(&self.id, self.ticket);
        (&mut self).await
    }

    /// Roll the entry back after the request failed to leave the process.
    pub(crate) fn discard(mut self) {
        self.settled = self.table.discard_ticket(&self.id, self.ticket);
    }

    /// Withdraw the entry without waiting. The slot resolves as cancelled
    /// unless another resolver already claimed it.
    pub fn withdraw(&self) -> bool { self.table.cancel_ticket(&self.id, self.ticket) }
}

impl Future for ReplySlot {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(result) => {
                this.settled = true;
                Poll::Ready(result.unwrap_or_else(|_| Err(CallError::Cancelled(this.id.clone()))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if !self.settled {
            self.table.cancel_ticket(&self.id, self.ticket);
        }
    }
}
