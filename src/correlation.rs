//! Correlation identifiers and the sources that mint them.
//!
//! A [`CorrelationId`] is the join key between a request and its reply. Ids
//! are either generated by a [`CorrelationIdSource`] or supplied by the
//! caller, in which case they are validated with [`CorrelationId::parse`].
//! The [`Correlatable`] trait abstracts over message types that carry an
//! optional identifier so the gateway and listener can stamp or inspect it
//! without knowing the concrete representation.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use static_assertions::const_assert;
use thiserror::Error;
use uuid::Uuid;

/// Longest correlation identifier accepted, in bytes.
pub const MAX_CORRELATION_ID_LEN: usize = 128;

// Length of a UUID rendered without hyphens.
const UUID_SIMPLE_LEN: usize = 32;

// Generated ids must always pass validation.
const_assert!(UUID_SIMPLE_LEN <= MAX_CORRELATION_ID_LEN);

/// Reasons a caller-supplied correlation identifier is rejected.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidCorrelationId {
    /// The identifier was empty.
    #[error("correlation id is empty")]
    Empty,
    /// The identifier exceeded [`MAX_CORRELATION_ID_LEN`].
    #[error("correlation id is {len} bytes; at most {max} allowed", max = MAX_CORRELATION_ID_LEN)]
    TooLong {
        /// Length of the rejected identifier in bytes.
        len: usize,
    },
    /// The identifier contained an ASCII control character.
    #[error("correlation id contains a control character at byte {index}")]
    ControlCharacter {
        /// Byte offset of the offending character.
        index: usize,
    },
    /// Caller-supplied identifiers are disabled for this gateway.
    #[error("caller-supplied correlation ids are disabled")]
    NotAccepted,
}

/// Opaque token linking a request message to its reply.
///
/// Cloning is cheap: the text is shared behind an [`Arc`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Validate and wrap an externally supplied identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCorrelationId`] if `value` is empty, longer than
    /// [`MAX_CORRELATION_ID_LEN`] bytes, or contains a control character.
    ///
    /// # Examples
    ///
    /// ```
    /// use inout::correlation::{CorrelationId, InvalidCorrelationId};
    ///
    /// let id = CorrelationId::parse("abc123").expect("valid id");
    /// assert_eq!(id.as_str(), "abc123");
    /// assert_eq!(CorrelationId::parse(""), Err(InvalidCorrelationId::Empty));
    /// ```
    pub fn parse(value: impl AsRef<str>) -> Result<Self, InvalidCorrelationId> {
        let value = value.as_ref();
        if value.is_empty() {
            return Err(InvalidCorrelationId::Empty);
        }
        if value.len() > MAX_CORRELATION_ID_LEN {
            return Err(InvalidCorrelationId::TooLong { len: value.len() });
        }
        if let Some(index) = value.bytes().position(|b| b.is_ascii_control()) {
            return Err(InvalidCorrelationId::ControlCharacter { index });
        }
        Ok(Self(Arc::from(value)))
    }

    /// Return the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str { &self.0 }
}

impl FromStr for CorrelationId {
    type Err = InvalidCorrelationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<&str> for CorrelationId {
    type Error = InvalidCorrelationId;

    fn try_from(value: &str) -> Result<Self, Self::Error> { Self::parse(value) }
}

impl TryFrom<String> for CorrelationId {
    type Error = InvalidCorrelationId;

    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(value) }
}

/// Produces fresh correlation identifiers.
///
/// Implementations are shared between concurrent callers and must return a
/// distinct value from every call without external locking.
pub trait CorrelationIdSource: Send + Sync {
    /// Mint a new identifier.
    fn generate(&self) -> CorrelationId;
}

/// Random 128-bit identifiers rendered as 32 lowercase hex characters.
///
/// This is the default source. Collisions with a concurrently pending id are
/// negligible.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIdSource;

impl CorrelationIdSource for RandomIdSource {
    fn generate(&self) -> CorrelationId {
        let mut buf = Uuid::encode_buffer();
        let text = Uuid::new_v4().simple().encode_lower(&mut buf);
        CorrelationId(Arc::from(&*text))
    }
}

/// Monotonically increasing identifiers of the form `{prefix}-{n}`.
///
/// Numbers start at 1 and are unique for the lifetime of the source. The
/// prefix keeps ids from separate processes apart; pick one that is unique
/// per process when several gateways share a reply queue.
#[derive(Debug)]
pub struct SequentialIdSource {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdSource {
    /// Create a source emitting ids under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCorrelationId`] if ids built from `prefix` would not
    /// pass [`CorrelationId::parse`].
    pub fn new(prefix: impl Into<String>) -> Result<Self, InvalidCorrelationId> {
        let prefix = prefix.into();
        // The longest id this source can emit.
        CorrelationId::parse(format!("{prefix}-{}", u64::MAX))?;
        Ok(Self {
            prefix,
            counter: AtomicU64::new(1),
        })
    }
}

impl CorrelationIdSource for SequentialIdSource {
    fn generate(&self) -> CorrelationId {
        // Only uniqueness matters here, so relaxed ordering is enough: the
        // increment itself is atomic.
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        CorrelationId(Arc::from(format!("{}-{n}", self.prefix)))
    }
}

/// Access and mutate correlation identifiers on messages.
pub trait Correlatable {
    /// Return the correlation identifier carried by this message, if any.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCorrelationId`] if an identifier is present but does
    /// not validate.
    fn correlation_id(&self) -> Result<Option<CorrelationId>, InvalidCorrelationId>;

    /// Set or clear the correlation identifier.
    fn set_correlation_id(&mut self, correlation_id: Option<&CorrelationId>);
}
