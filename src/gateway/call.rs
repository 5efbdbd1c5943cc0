//! Per-call options and handles.

use std::{future::IntoFuture, sync::Arc, time::Duration};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    correlation::CorrelationId,
    error::CallError,
    message::{Destination, Headers, ReplyEnvelope},
    pending::{PendingTable, ReplySlot, Ticket},
    transport::Subscription,
};

/// Optional per-call settings.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub(super) correlation_id: Option<String>,
    pub(super) timeout: Option<Duration>,
    pub(super) headers: Headers,
}

impl CallOptions {
    /// Options that defer everything to the gateway configuration.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Use `id` as the correlation id instead of generating one.
    ///
    /// Only honoured by gateways accepting caller-supplied ids.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Override the gateway's request timeout for this call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an extra header to the outbound request.
    ///
    /// The correlation and reply-to headers are always set by the gateway and
    /// override anything given here.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A request that has been sent and is awaiting its reply.
///
/// Await it (it implements [`IntoFuture`]) or call [`PendingCall::wait`].
/// Dropping it abandons the request and withdraws the pending entry.
#[must_use = "a PendingCall does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingCall {
    pub(super) slot: ReplySlot,
    pub(super) reply_to: Destination,
    pub(super) table: Arc<PendingTable>,
    pub(super) subscription: Option<Subscription>,
}

impl PendingCall {
    /// Correlation id the request was sent with.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId { self.slot.correlation_id() }

    /// Destination the reply is expected on.
    #[must_use]
    pub fn reply_to(&self) -> &Destination { &self.reply_to }

    /// Handle that can cancel this call from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            table: Arc::clone(&self.table),
            id: self.slot.correlation_id().clone(),
            ticket: self.slot.ticket(),
        }
    }

    /// Wait for the reply or the request deadline.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::RequestTimeout`], [`CallError::Cancelled`] or
    /// [`CallError::ReplyFault`].
    pub async fn wait(self) -> Result<ReplyEnvelope, CallError> {
        let PendingCall {
            slot, subscription, ..
        } = self;
        let result = slot.wait().await;
        // A temporary reply destination lives exactly as long as its call.
        drop(subscription);
        result
    }
}

impl IntoFuture for PendingCall {
    type Output = Result<ReplyEnvelope, CallError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture { self.wait().boxed() }
}

/// Cancels one specific call.
///
/// Cancelling after the call has already completed is a no-op.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    table: Arc<PendingTable>,
    id: CorrelationId,
    ticket: Ticket,
}

impl CancelHandle {
    /// Correlation id of the call this handle cancels.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId { &self.id }

    /// Cancel the call. Returns `false` if it had already completed.
    pub fn cancel(&self) -> bool { self.table.cancel_ticket(&self.id, self.ticket) }
}
