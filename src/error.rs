//! Canonical error types for the crate.
//!
//! [`CallError`] is the only error a caller of the gateway ever observes.
//! Listener-side anomalies are described by [`ReplyAnomaly`]; they are logged
//! and counted but never surfaced, because no caller is waiting for them.

use std::time::Duration;

use thiserror::Error;

use crate::{
    correlation::{CorrelationId, InvalidCorrelationId},
    message::Destination,
};

/// Errors returned by [`crate::gateway::RequestGateway`] calls.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Another request with this correlation id is still pending.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(CorrelationId),
    /// The caller supplied a correlation id that cannot be used.
    #[error("invalid correlation id: {0}")]
    InvalidCorrelationId(#[from] InvalidCorrelationId),
    /// The transport rejected the outbound request.
    #[error("failed to send request {correlation_id} to {destination}")]
    SendFailure {
        /// Identifier of the request that was rolled back.
        correlation_id: CorrelationId,
        /// Destination the request was addressed to.
        destination: Destination,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
    /// No reply arrived within the configured window.
    #[error("no reply for {correlation_id} within {timeout:?}")]
    RequestTimeout {
        /// Identifier of the abandoned request.
        correlation_id: CorrelationId,
        /// Window the request was given.
        timeout: Duration,
    },
    /// The request was cancelled before a reply arrived.
    #[error("request {0} was cancelled")]
    Cancelled(CorrelationId),
    /// The responder answered with a fault instead of a payload.
    #[error("reply for {correlation_id} reported a fault: {reason}")]
    ReplyFault {
        /// Identifier of the failed request.
        correlation_id: CorrelationId,
        /// Reason carried by the fault header.
        reason: String,
    },
    /// A temporary reply destination could not be prepared.
    #[error("failed to prepare reply destination")]
    ReplyDestination(#[source] TransportError),
    /// The gateway has been shut down.
    #[error("gateway is shut down")]
    Shutdown,
}

impl CallError {
    /// Correlation id the error refers to, when one was assigned.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::DuplicateCorrelationId(id) | Self::Cancelled(id) => Some(id),
            Self::SendFailure { correlation_id, .. }
            | Self::RequestTimeout { correlation_id, .. }
            | Self::ReplyFault { correlation_id, .. } => Some(correlation_id),
            Self::InvalidCorrelationId(_) | Self::ReplyDestination(_) | Self::Shutdown => None,
        }
    }

    /// Returns true if this error is a [`CallError::RequestTimeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool { matches!(self, Self::RequestTimeout { .. }) }
}

/// Failures reported by a [`crate::transport::Transport`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport refused the operation.
    #[error("{destination} rejected the operation: {reason}")]
    Rejected {
        /// Destination involved.
        destination: Destination,
        /// Transport-provided reason.
        reason: String,
    },
    /// The destination does not exist (for example, a deleted temporary queue).
    #[error("unknown destination {0}")]
    UnknownDestination(Destination),
    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
    /// The transport lacks an optional capability.
    #[error("transport does not support {0}")]
    Unsupported(&'static str),
}

/// Listener-side problems with inbound replies.
///
/// These never reach a caller; the listener logs and counts them.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplyAnomaly {
    /// The reply had no usable correlation id.
    #[error("malformed reply on {destination}: {reason}")]
    MalformedReply {
        /// Destination the reply was consumed from.
        destination: Destination,
        /// Why the correlation id could not be used.
        reason: String,
    },
    /// No pending request matched the reply's correlation id.
    #[error("late or duplicate reply {correlation_id} on {destination}")]
    LateOrDuplicateReply {
        /// Identifier carried by the reply.
        correlation_id: CorrelationId,
        /// Destination the reply was consumed from.
        destination: Destination,
    },
}

/// Invalid gateway configuration.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No request timeout was configured.
    #[error("a request timeout must be configured")]
    MissingTimeout,
    /// The request timeout was zero.
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
    /// The reaper interval was zero.
    #[error("reap interval must be greater than zero")]
    ZeroReapInterval,
    /// No reply destination mode was configured.
    #[error("a reply destination (fixed or temporary) must be configured")]
    MissingReplyDestination,
}

/// Errors raised while starting a gateway.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Subscribing to the fixed reply destination failed.
    #[error("failed to subscribe to reply destination")]
    Subscribe(#[source] TransportError),
}
