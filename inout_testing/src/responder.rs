//! Scripted server side of a request/reply exchange.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use futures::FutureExt;
use inout::{
    Correlatable,
    CorrelationId,
    Destination,
    InMemoryBroker,
    Message,
    MessageHandler,
    Subscription,
    Transport,
    message::FAULT_HEADER,
};

/// How a [`Responder`] answers each request.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Send the request payload back unchanged.
    Echo,
    /// Send a fixed payload.
    Text(Bytes),
    /// Answer with a fault header carrying the given reason.
    Fault(String),
    /// Answer with a different correlation id than the request carried.
    Mismatched(String),
    /// Never answer.
    Silent,
}

/// Builder for a responder consuming one request queue.
#[derive(Clone, Debug)]
pub struct Responder {
    broker: InMemoryBroker,
    queue: Destination,
    reply: Reply,
    delay: Option<Duration>,
}

impl Responder {
    /// Echo every request arriving on `queue`.
    pub fn new(broker: &InMemoryBroker, queue: impl Into<Destination>) -> Self {
        Self {
            broker: broker.clone(),
            queue: queue.into(),
            reply: Reply::Echo,
            delay: None,
        }
    }

    /// Answer every request with `payload`.
    #[must_use]
    pub fn replying(mut self, payload: impl Into<Bytes>) -> Self {
        self.reply = Reply::Text(payload.into());
        self
    }

    /// Answer every request with a fault.
    #[must_use]
    pub fn faulting(mut self, reason: impl Into<String>) -> Self {
        self.reply = Reply::Fault(reason.into());
        self
    }

    /// Answer every request with correlation id `id`.
    #[must_use]
    pub fn mismatched(mut self, id: impl Into<String>) -> Self {
        self.reply = Reply::Mismatched(id.into());
        self
    }

    /// Consume requests without answering.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.reply = Reply::Silent;
        self
    }

    /// Wait `delay` before answering.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Subscribe to the request queue.
    ///
    /// # Panics
    ///
    /// Panics if the broker refuses the subscription.
    pub async fn start(self) -> ResponderHandle {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let Self {
            broker,
            queue,
            reply,
            delay,
        } = self;
        let sender = broker.clone();
        let handler: MessageHandler = Arc::new(move |request: Message| {
            seen.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            let broker = sender.clone();
            let reply = reply.clone();
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let Some(reply_to) = request.reply_to() else {
                    log::warn!("responder dropped request without reply-to");
                    return;
                };
                let Some(message) = answer(&request, &reply) else {
                    return;
                };
                if let Err(err) = broker.send(message, &reply_to).await {
                    log::warn!("responder failed to reply: {err}");
                }
            }
            .boxed()
        });
        let subscription = broker
            .subscribe(&queue, handler)
            .await
            .expect("responder subscribe failed");
        ResponderHandle {
            requests,
            _subscription: subscription,
        }
    }
}

fn answer(request: &Message, reply: &Reply) -> Option<Message> {
    let id = request.correlation_id().ok().flatten();
    let mut message = match reply {
        Reply::Echo => Message::new(request.payload().clone()),
        Reply::Text(payload) => Message::new(payload.clone()),
        Reply::Fault(reason) => Message::new(Bytes::new()).with_header(FAULT_HEADER, reason.as_str()),
        Reply::Mismatched(other) => {
            let mut message = Message::new(request.payload().clone());
            message.set_correlation_id(CorrelationId::parse(other).ok().as_ref());
            return Some(message);
        }
        Reply::Silent => return None,
    };
    message.set_correlation_id(id.as_ref());
    Some(message)
}

/// Running responder. Dropping it stops consumption.
#[derive(Debug)]
pub struct ResponderHandle {
    requests: Arc<Mutex<Vec<Message>>>,
    _subscription: Subscription,
}

impl ResponderHandle {
    /// Requests received so far.
    pub fn requests(&self) -> Vec<Message> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
