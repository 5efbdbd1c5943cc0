//! Synchronous request/reply over a one-way queue transport.
//!
//! A [`RequestGateway`] registers a pending entry, stamps the outbound
//! message with a correlation id and reply destination, sends it, and hands
//! back a [`PendingCall`] that resolves when the matching reply arrives or the
//! request deadline passes. Registration always happens before the send, so a
//! reply racing ahead of the send call still finds its entry.

mod builder;
mod call;

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub use self::{
    builder::GatewayBuilder,
    call::{CallOptions, CancelHandle, PendingCall},
};
use crate::{
    config::{CorrelationIdMode, GatewayConfig, ReplyDestinationMode},
    correlation::{Correlatable, CorrelationId, CorrelationIdSource, InvalidCorrelationId},
    error::{CallError, GatewayError},
    listener::{ListenerStats, ReplyListener},
    message::{Destination, Message, ReplyEnvelope},
    metrics,
    pending::{PendingTable, ReplySlot, TableStats},
    reaper::{ExpiryReaper, ReaperHandle},
    transport::{Subscription, Transport},
};

/// How many freshly generated ids are tried before a collision is reported.
const GENERATED_ID_ATTEMPTS: usize = 3;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

struct GatewayInner<T> {
    transport: Arc<T>,
    table: Arc<PendingTable>,
    listener: ReplyListener,
    config: GatewayConfig,
    ids: Arc<dyn CorrelationIdSource>,
    reply_subscription: Mutex<Option<Subscription>>,
    reaper: Mutex<Option<ReaperHandle>>,
    closed: AtomicBool,
    runtime: Handle,
}

/// Client-side entry point turning one-way sends into request/reply calls.
///
/// Cloning is cheap; clones share the pending table, the reply listener and
/// the reaper.
pub struct RequestGateway<T> {
    inner: Arc<GatewayInner<T>>,
}

impl<T> Clone for RequestGateway<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for RequestGateway<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGateway")
            .field("config", &self.inner.config)
            .field("pending", &self.inner.table.len())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RequestGateway<T> {
    /// Start configuring a gateway over `transport`.
    #[must_use]
    pub fn builder(transport: impl Into<Arc<T>>) -> GatewayBuilder<T> { GatewayBuilder::new(transport.into()) }

    async fn start_with(
        transport: Arc<T>,
        config: GatewayConfig,
        ids: Arc<dyn CorrelationIdSource>,
    ) -> Result<Self, GatewayError> {
        let table = Arc::new(PendingTable::new());
        let listener = ReplyListener::new(Arc::clone(&table));
        let reaper = ExpiryReaper::new(Arc::clone(&table), config.reap_interval)?;
        let reply_subscription = match &config.reply_destination {
            ReplyDestinationMode::Fixed(destination) => Some(
                transport
                    .subscribe(destination, listener.handler(destination.clone()))
                    .await
                    .map_err(GatewayError::Subscribe)?,
            ),
            ReplyDestinationMode::Temporary => None,
        };
        let reaper = reaper.spawn();
        info!(
            timeout = ?config.timeout,
            reply_destination = ?config.reply_destination,
            "request gateway started"
        );
        Ok(Self {
            inner: Arc::new(GatewayInner {
                transport,
                table,
                listener,
                config,
                ids,
                reply_subscription: Mutex::new(reply_subscription),
                reaper: Mutex::new(Some(reaper)),
                closed: AtomicBool::new(false),
                runtime: Handle::current(),
            }),
        })
    }

    /// Send `payload` to `destination` and return a handle to the pending
    /// reply.
    ///
    /// The returned future completes once the request has been handed to the
    /// transport. Await the [`PendingCall`] for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Shutdown`] after [`RequestGateway::shutdown`],
    /// [`CallError::InvalidCorrelationId`] or
    /// [`CallError::DuplicateCorrelationId`] when the correlation id cannot be
    /// used, [`CallError::ReplyDestination`] when a temporary reply
    /// destination cannot be prepared, and [`CallError::SendFailure`] when the
    /// transport rejects the request. No entry remains pending after any of
    /// these errors.
    pub async fn send_request(
        &self,
        payload: impl Into<Bytes>,
        destination: &Destination,
        options: CallOptions,
    ) -> Result<PendingCall, CallError> {
        let inner = &*self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(CallError::Shutdown);
        }
        let CallOptions {
            correlation_id,
            timeout,
            headers,
        } = options;
        let timeout = timeout.unwrap_or(inner.config.timeout);
        let (reply_to, subscription) = self.reply_destination().await?;
        let slot = self.register(correlation_id.as_deref(), timeout)?;
        let id = slot.correlation_id().clone();

        let mut message = Message::new(payload).with_headers(headers);
        message.set_correlation_id(Some(&id));
        message.set_reply_to(&reply_to);

        // Shutdown may have run while the reply destination was prepared.
        if inner.table.is_closed() {
            slot.discard();
            return Err(CallError::Shutdown);
        }
        if let Err(source) = inner.transport.send(message, destination).await {
            slot.discard();
            metrics::inc_send_failures();
            warn!(correlation_id = %id, %destination, error = %source, "request send failed");
            return Err(CallError::SendFailure {
                correlation_id: id,
                destination: destination.clone(),
                source,
            });
        }
        metrics::inc_requests();
        debug!(correlation_id = %id, %destination, %reply_to, ?timeout, "request sent");
        Ok(PendingCall {
            slot,
            reply_to,
            table: Arc::clone(&inner.table),
            subscription,
        })
    }

    /// Send a request and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns every error of [`RequestGateway::send_request`] plus
    /// [`CallError::RequestTimeout`], [`CallError::Cancelled`] and
    /// [`CallError::ReplyFault`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use inout::{
    ///     error::CallError,
    ///     gateway::{CallOptions, RequestGateway},
    ///     message::Destination,
    ///     transport::InMemoryBroker,
    /// };
    ///
    /// # #[tokio::main(flavor = "current_thread", start_paused = true)]
    /// # async fn main() {
    /// let gateway = RequestGateway::builder(InMemoryBroker::new())
    ///     .timeout(Duration::from_millis(200))
    ///     .reply_to(Destination::new("queue.response"))
    ///     .start()
    ///     .await
    ///     .expect("failed to start gateway");
    ///
    /// // Nobody consumes the request queue, so the call times out.
    /// let result = gateway
    ///     .call("Hello World", &Destination::new("queue.request"), CallOptions::new())
    ///     .await;
    /// assert!(matches!(result, Err(CallError::RequestTimeout { .. })));
    /// # }
    /// ```
    pub async fn call(
        &self,
        payload: impl Into<Bytes>,
        destination: &Destination,
        options: CallOptions,
    ) -> Result<ReplyEnvelope, CallError> {
        self.send_request(payload, destination, options).await?.await
    }

    /// Blocking form of [`RequestGateway::call`] for synchronous callers.
    ///
    /// # Errors
    ///
    /// Same as [`RequestGateway::call`].
    ///
    /// # Panics
    ///
    /// Panics when invoked from within an asynchronous execution context. Use
    /// `tokio::task::spawn_blocking` or a plain thread.
    pub fn call_blocking(
        &self,
        payload: impl Into<Bytes>,
        destination: &Destination,
        options: CallOptions,
    ) -> Result<ReplyEnvelope, CallError> {
        self.inner
            .runtime
            .block_on(self.call(payload, destination, options))
    }

    /// Cancel the call behind `handle`. Its waiter observes
    /// [`CallError::Cancelled`].
    ///
    /// Returns `false` if the call already completed. A later call reusing the
    /// same correlation id is never affected.
    pub fn cancel(&self, handle: &CancelHandle) -> bool {
        let cancelled = handle.cancel();
        if cancelled {
            debug!(correlation_id = %handle.correlation_id(), "request cancelled");
        }
        cancelled
    }

    /// Cancel whichever request is pending under `id`.
    ///
    /// Returns `false` if no such request is pending.
    pub fn cancel_id(&self, id: &CorrelationId) -> bool {
        let cancelled = self.inner.table.remove(id);
        if cancelled {
            debug!(correlation_id = %id, "request cancelled");
        }
        cancelled
    }

    /// Stop the gateway.
    ///
    /// The reaper is stopped, the reply subscription is dropped, and every
    /// outstanding request completes with [`CallError::Cancelled`]. Later
    /// calls fail with [`CallError::Shutdown`]. Returns the number of requests
    /// that were cancelled.
    pub async fn shutdown(&self) -> usize {
        let inner = &*self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let reaper = lock(&inner.reaper).take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }
        drop(lock(&inner.reply_subscription).take());
        let cancelled = inner.table.close();
        info!(cancelled, "request gateway shut down");
        cancelled
    }

    /// Whether [`RequestGateway::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.inner.table.len() }

    /// Reply listener counters.
    #[must_use]
    pub fn listener_stats(&self) -> ListenerStats { self.inner.listener.stats() }

    /// Pending table counters.
    #[must_use]
    pub fn table_stats(&self) -> TableStats { self.inner.table.stats() }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig { &self.inner.config }

    /// Resolve where this call's reply goes, provisioning and subscribing to
    /// a temporary destination when configured.
    async fn reply_destination(&self) -> Result<(Destination, Option<Subscription>), CallError> {
        let inner = &*self.inner;
        match &inner.config.reply_destination {
            ReplyDestinationMode::Fixed(destination) => Ok((destination.clone(), None)),
            ReplyDestinationMode::Temporary => {
                let destination = inner
                    .transport
                    .provision_temporary_destination()
                    .await
                    .map_err(CallError::ReplyDestination)?;
                let subscribed = inner
                    .transport
                    .subscribe(&destination, inner.listener.handler(destination.clone()))
                    .await;
                match subscribed {
                    Ok(subscription) => Ok((destination, Some(subscription))),
                    Err(err) => {
                        if let Err(release) = inner.transport.release_temporary_destination(&destination).await {
                            warn!(%destination, error = %release, "failed to release temporary destination");
                        }
                        Err(CallError::ReplyDestination(err))
                    }
                }
            }
        }
    }

    fn register(&self, requested: Option<&str>, timeout: Duration) -> Result<ReplySlot, CallError> {
        let inner = &*self.inner;
        match (inner.config.correlation_ids, requested) {
            (CorrelationIdMode::Generated, Some(_)) => Err(InvalidCorrelationId::NotAccepted.into()),
            (CorrelationIdMode::CallerSupplied, Some(raw)) => {
                inner.table.register(CorrelationId::parse(raw)?, timeout)
            }
            (_, None) => self.register_generated(timeout),
        }
    }

    fn register_generated(&self, timeout: Duration) -> Result<ReplySlot, CallError> {
        let inner = &*self.inner;
        let mut attempt = 1;
        loop {
            match inner.table.register(inner.ids.generate(), timeout) {
                Err(CallError::DuplicateCorrelationId(id)) if attempt < GENERATED_ID_ATTEMPTS => {
                    warn!(correlation_id = %id, attempt, "generated correlation id collided");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
