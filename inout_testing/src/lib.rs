//! Test utilities for exercising an [`inout`] gateway against the in-memory
//! broker.
//!
//! [`Responder`] plays the server side of the request/reply exchange: it
//! consumes a request queue and answers on each request's reply-to
//! destination, echoing the correlation id. [`logger`] serialises access to
//! the global log capture.
//!
//! ```rust
//! use inout::InMemoryBroker;
//! use inout_testing::Responder;
//!
//! # async fn example(broker: InMemoryBroker) {
//! let responder = Responder::new(&broker, "queue.request")
//!     .replying("How are you")
//!     .start()
//!     .await;
//! assert_eq!(responder.request_count(), 0);
//! # }
//! ```

pub mod logging;
pub mod responder;

use inout::InMemoryBroker;
pub use logging::{LoggerHandle, logger};
pub use responder::{Reply, Responder, ResponderHandle};
use rstest::fixture;

/// Fresh in-memory broker.
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn broker() -> InMemoryBroker { InMemoryBroker::new() }
