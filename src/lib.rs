#![doc(html_root_url = "https://docs.rs/inout/latest")]
//! Public API for the `inout` library.
//!
//! This crate layers synchronous request/reply ("In-Out") semantics over a
//! one-way, queue-based message transport. A caller sends a request and
//! receives the matching reply, correlated by an identifier carried in message
//! headers, or a timeout error if no reply arrives in time.

pub mod config;
pub mod correlation;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod pending;
pub mod reaper;
pub mod transport;

pub use config::{CorrelationIdMode, GatewayConfig, ReplyDestinationMode};
pub use correlation::{
    Correlatable,
    CorrelationId,
    CorrelationIdSource,
    InvalidCorrelationId,
    RandomIdSource,
    SequentialIdSource,
};
pub use error::{CallError, ConfigError, GatewayError, ReplyAnomaly, TransportError};
pub use gateway::{CallOptions, CancelHandle, GatewayBuilder, PendingCall, RequestGateway};
pub use listener::{ListenerStats, ReplyListener};
pub use message::{Destination, Headers, Message, ReplyEnvelope};
pub use metrics::ReplyOutcome;
pub use pending::{PendingTable, ReplySlot, TableStats};
pub use reaper::{ExpiryReaper, ReaperHandle};
pub use transport::{InMemoryBroker, MessageHandler, Subscription, Transport};
