//! In-memory loopback broker.
//!
//! [`InMemoryBroker`] gives the engine something to talk to without a real
//! message broker: named queues, temporary destinations, and push-based
//! consumers, all inside the current process. Messages sent while nobody is
//! subscribed wait in a per-queue backlog and are delivered to the first
//! consumer that arrives. With several consumers, messages are handed out
//! round-robin. Each delivery runs the consumer's handler on its own task.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use log::{debug, trace};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use super::{MessageHandler, Subscription, Transport};
use crate::{
    error::TransportError,
    message::{Destination, Message, TEMPORARY_SCHEME},
};

/// Process-local broker implementing [`Transport`].
///
/// Cloning is cheap; clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("queues", &self.inner.queues.len())
            .field("temporaries", &self.inner.temporaries.len())
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct BrokerInner {
    queues: DashMap<Destination, QueueState>,
    temporaries: DashSet<Destination>,
    rejections: DashMap<Destination, String>,
    next_consumer: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Message>,
    consumers: Vec<Consumer>,
    cursor: usize,
}

struct Consumer {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

impl QueueState {
    /// Hand `message` to the next live consumer, or park it in the backlog.
    fn dispatch(&mut self, mut message: Message) {
        while !self.consumers.is_empty() {
            let idx = self.cursor % self.consumers.len();
            match self.consumers[idx].tx.send(message) {
                Ok(()) => {
                    self.cursor = idx.wrapping_add(1);
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // Consumer is shutting down; try the next one.
                    message = returned;
                    self.consumers.swap_remove(idx);
                }
            }
        }
        self.backlog.push_back(message);
    }
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Make every send to `destination` fail with
    /// [`TransportError::Rejected`].
    pub fn reject_sends_to(&self, destination: &Destination, reason: impl Into<String>) {
        self.inner.rejections.insert(destination.clone(), reason.into());
    }

    /// Undo [`InMemoryBroker::reject_sends_to`].
    pub fn accept_sends_to(&self, destination: &Destination) {
        self.inner.rejections.remove(destination);
    }

    /// Number of messages waiting for a consumer on `destination`.
    #[must_use]
    pub fn backlog_len(&self, destination: &Destination) -> usize {
        self.inner
            .queues
            .get(destination)
            .map_or(0, |queue| queue.backlog.len())
    }

    /// Number of live consumers on `destination`.
    #[must_use]
    pub fn consumer_count(&self, destination: &Destination) -> usize {
        self.inner
            .queues
            .get(destination)
            .map_or(0, |queue| queue.consumers.len())
    }

    /// Whether `destination` is a temporary destination that still exists.
    #[must_use]
    pub fn temporary_exists(&self, destination: &Destination) -> bool {
        self.inner.temporaries.contains(destination)
    }

    /// Stop all consumers and wait for in-flight handlers to finish.
    ///
    /// Subsequent sends and subscriptions fail with
    /// [`TransportError::Closed`].
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn check_exists(&self, destination: &Destination) -> Result<(), TransportError> {
        if destination.is_temporary() && !self.inner.temporaries.contains(destination) {
            return Err(TransportError::UnknownDestination(destination.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn send(&self, message: Message, destination: &Destination) -> Result<(), TransportError> {
        self.check_open()?;
        let rejection = self
            .inner
            .rejections
            .get(destination)
            .map(|reason| reason.value().clone());
        if let Some(reason) = rejection {
            return Err(TransportError::Rejected {
                destination: destination.clone(),
                reason,
            });
        }
        self.check_exists(destination)?;
        self.inner
            .queues
            .entry(destination.clone())
            .or_default()
            .dispatch(message);
        trace!("message queued on {destination}");
        Ok(())
    }

    async fn subscribe(
        &self,
        destination: &Destination,
        handler: MessageHandler,
    ) -> Result<Subscription, TransportError> {
        self.check_open()?;
        self.check_exists(destination)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_consumer.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.inner.queues.entry(destination.clone()).or_default();
            while let Some(message) = queue.backlog.pop_front() {
                // The receiver is held below, so this cannot fail.
                let _ = tx.send(message);
            }
            queue.consumers.push(Consumer { id, tx });
        }
        let token = self.inner.shutdown.child_token();
        self.inner.tracker.spawn(consume(
            Arc::clone(&self.inner),
            ConsumerTask {
                destination: destination.clone(),
                id,
                rx,
                handler,
                token: token.clone(),
            },
        ));
        debug!("consumer {id} subscribed to {destination}");
        Ok(Subscription::new(destination.clone(), token))
    }

    async fn provision_temporary_destination(&self) -> Result<Destination, TransportError> {
        self.check_open()?;
        let destination = Destination::new(format!("{TEMPORARY_SCHEME}{}", Uuid::new_v4().simple()));
        self.inner.temporaries.insert(destination.clone());
        debug!("provisioned temporary destination {destination}");
        Ok(destination)
    }

    async fn release_temporary_destination(&self, destination: &Destination) -> Result<(), TransportError> {
        if !destination.is_temporary() {
            return Err(TransportError::Rejected {
                destination: destination.clone(),
                reason: "not a temporary destination".to_owned(),
            });
        }
        let busy = self
            .inner
            .queues
            .get(destination)
            .is_some_and(|queue| !queue.consumers.is_empty());
        if !busy {
            self.inner
                .queues
                .remove_if(destination, |_, queue| queue.consumers.is_empty());
            self.inner.temporaries.remove(destination);
            debug!("released temporary destination {destination}");
        }
        Ok(())
    }
}

struct ConsumerTask {
    destination: Destination,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
    handler: MessageHandler,
    token: CancellationToken,
}

async fn consume(inner: Arc<BrokerInner>, task: ConsumerTask) {
    let ConsumerTask {
        destination,
        id,
        mut rx,
        handler,
        token,
    } = task;
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => {
                    inner.tracker.spawn(handler(message));
                }
                None => break,
            },
        }
    }
    inner.detach(&destination, id, rx);
}

impl BrokerInner {
    /// Remove a finished consumer and requeue anything it never handled.
    fn detach(&self, destination: &Destination, id: u64, mut rx: mpsc::UnboundedReceiver<Message>) {
        rx.close();
        let leftover: Vec<Message> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let now_idle = match self.queues.get_mut(destination) {
            Some(mut queue) => {
                queue.consumers.retain(|consumer| consumer.id != id);
                for message in leftover {
                    queue.dispatch(message);
                }
                queue.consumers.is_empty()
            }
            None => false,
        };
        debug!("consumer {id} left {destination}");
        if now_idle
            && destination.is_temporary()
            && self
                .queues
                .remove_if(destination, |_, queue| queue.consumers.is_empty())
                .is_some()
        {
            self.temporaries.remove(destination);
            debug!("deleted temporary destination {destination}");
        }
    }
}
