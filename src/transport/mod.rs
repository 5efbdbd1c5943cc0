//! The queue transport the correlation engine is layered on.
//!
//! The engine needs only three things from a transport: a fire-and-forget
//! [`Transport::send`], a push-based [`Transport::subscribe`], and optionally
//! [`Transport::provision_temporary_destination`] with its matching release.
//! Connection management, delivery guarantees and wire formats are the
//! transport's business.

pub mod memory;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

pub use self::memory::InMemoryBroker;
use crate::{
    error::TransportError,
    message::{Destination, Message},
};

/// Callback invoked once per inbound message.
///
/// Transports may run several invocations concurrently.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// One-way queue transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish `message` to `destination` without waiting for any response.
    async fn send(&self, message: Message, destination: &Destination) -> Result<(), TransportError>;

    /// Register `handler` as a consumer of `destination`.
    ///
    /// Messages are delivered until the returned [`Subscription`] is dropped.
    async fn subscribe(
        &self,
        destination: &Destination,
        handler: MessageHandler,
    ) -> Result<Subscription, TransportError>;

    /// Create a destination that lives only as long as its subscriptions.
    ///
    /// The default implementation reports the capability as unsupported.
    async fn provision_temporary_destination(&self) -> Result<Destination, TransportError> {
        Err(TransportError::Unsupported("temporary destinations"))
    }

    /// Delete a temporary destination that will never be subscribed to.
    ///
    /// Destinations with live subscriptions are left alone. The default
    /// implementation does nothing.
    async fn release_temporary_destination(&self, destination: &Destination) -> Result<(), TransportError> {
        let _ = destination;
        Ok(())
    }
}

/// Active consumer registration returned by [`Transport::subscribe`].
///
/// Dropping the subscription cancels it.
#[must_use = "dropping a Subscription stops message delivery"]
#[derive(Debug)]
pub struct Subscription {
    destination: Destination,
    token: CancellationToken,
}

impl Subscription {
    /// Wrap the token a transport uses to stop delivering to a consumer.
    pub fn new(destination: Destination, token: CancellationToken) -> Self {
        Self { destination, token }
    }

    /// Destination this subscription consumes from.
    #[must_use]
    pub fn destination(&self) -> &Destination { &self.destination }

    /// Whether delivery has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.token.is_cancelled() }

    /// Stop delivery now.
    pub fn cancel(self) { drop(self); }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.token.cancel(); }
}
