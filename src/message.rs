//! Message model shared by the gateway, the listener and transports.
//!
//! Messages are an opaque [`Bytes`] payload plus string headers. The engine
//! only ever reads or writes the well-known headers below; everything else
//! is passed through untouched.

use std::{collections::BTreeMap, fmt, sync::Arc};

use bytes::Bytes;

use crate::correlation::{Correlatable, CorrelationId, InvalidCorrelationId};

/// Header carrying the correlation identifier.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";
/// Header naming the destination replies should be sent to.
pub const REPLY_TO_HEADER: &str = "reply-to";
/// Header marking a reply as a failure; its value is the reason.
pub const FAULT_HEADER: &str = "fault";

/// Scheme prefix used for transport-managed temporary destinations.
pub const TEMPORARY_SCHEME: &str = "temp-queue://";

/// Named queue address.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination(Arc<str>);

impl Destination {
    /// Create a destination with the given name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self { Self(Arc::from(name.as_ref())) }

    /// Return the destination name.
    #[must_use]
    pub fn name(&self) -> &str { &self.0 }

    /// Whether this destination was provisioned as a temporary queue.
    #[must_use]
    pub fn is_temporary(&self) -> bool { self.0.starts_with(TEMPORARY_SCHEME) }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self { Self::new(value) }
}

impl From<String> for Destination {
    fn from(value: String) -> Self { Self(Arc::from(value)) }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Destination({})", self.0)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// String-keyed message headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Look up a header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> { self.0.get(name).map(String::as_str) }

    /// Insert or replace a header, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> { self.0.remove(name) }

    /// Iterate over headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether no headers are set.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A message travelling over a queue transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    headers: Headers,
}

impl Message {
    /// Create a message with the given payload and no headers.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            headers: Headers::new(),
        }
    }

    /// Replace the headers wholesale.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set a single header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Borrow the payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Borrow the headers.
    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    /// Mutably borrow the headers.
    pub fn headers_mut(&mut self) -> &mut Headers { &mut self.headers }

    /// Look up a single header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { self.headers.get(name) }

    /// Destination named by the `reply-to` header, if present.
    #[must_use]
    pub fn reply_to(&self) -> Option<Destination> {
        self.headers.get(REPLY_TO_HEADER).map(Destination::new)
    }

    /// Set the `reply-to` header.
    pub fn set_reply_to(&mut self, destination: &Destination) {
        self.headers.insert(REPLY_TO_HEADER, destination.name());
    }

    /// Split into payload and headers.
    #[must_use]
    pub fn into_parts(self) -> (Bytes, Headers) { (self.payload, self.headers) }
}

impl Correlatable for Message {
    fn correlation_id(&self) -> Result<Option<CorrelationId>, InvalidCorrelationId> {
        self.headers
            .get(CORRELATION_ID_HEADER)
            .map(CorrelationId::parse)
            .transpose()
    }

    fn set_correlation_id(&mut self, correlation_id: Option<&CorrelationId>) {
        match correlation_id {
            Some(id) => {
                self.headers.insert(CORRELATION_ID_HEADER, id.as_str());
            }
            None => {
                self.headers.remove(CORRELATION_ID_HEADER);
            }
        }
    }
}

/// A reply matched to its pending request.
///
/// The payload is handed through exactly as the transport delivered it;
/// decoding is left to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyEnvelope {
    correlation_id: CorrelationId,
    payload: Bytes,
    headers: Headers,
    reply_destination: Destination,
}

impl ReplyEnvelope {
    /// Build an envelope from an inbound reply message.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, message: Message, reply_destination: Destination) -> Self {
        let (payload, headers) = message.into_parts();
        Self {
            correlation_id,
            payload,
            headers,
            reply_destination,
        }
    }

    /// Correlation identifier the reply was matched on.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId { &self.correlation_id }

    /// Borrow the reply payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Take ownership of the reply payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// All headers carried by the reply.
    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    /// Look up a single reply header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { self.headers.get(name) }

    /// Destination the reply was consumed from.
    #[must_use]
    pub fn reply_destination(&self) -> &Destination { &self.reply_destination }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_header_round_trips_through_trait() {
        let id = CorrelationId::parse("abc123").expect("valid id");
        let mut message = Message::new("Hello World!");
        message.set_correlation_id(Some(&id));
        assert_eq!(message.header(CORRELATION_ID_HEADER), Some("abc123"));
        assert_eq!(message.correlation_id(), Ok(Some(id)));

        message.set_correlation_id(None);
        assert_eq!(message.correlation_id(), Ok(None));
    }

    #[test]
    fn invalid_correlation_header_is_reported() {
        let message = Message::new("x").with_header(CORRELATION_ID_HEADER, "");
        assert_eq!(message.correlation_id(), Err(InvalidCorrelationId::Empty));
    }

    #[test]
    fn temporary_destinations_are_recognised() {
        assert!(Destination::new("temp-queue://42").is_temporary());
        assert!(!Destination::new("queue.response").is_temporary());
    }

    #[test]
    fn reply_to_reads_header() {
        let mut message = Message::new("x");
        assert_eq!(message.reply_to(), None);
        message.set_reply_to(&Destination::new("queue.response"));
        assert_eq!(message.reply_to(), Some(Destination::new("queue.response")));
    }
}
