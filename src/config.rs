//! Gateway configuration types.
//!
//! There is no default request timeout. Every gateway states one, so pending
//! entries are always bounded.

use std::time::Duration;

use static_assertions::const_assert;

use crate::{error::ConfigError, message::Destination};

/// Default interval between expiry sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_millis(100);

// The sweep must run at least once a second or abandoned entries linger.
const_assert!(DEFAULT_REAP_INTERVAL.as_millis() > 0 && DEFAULT_REAP_INTERVAL.as_millis() <= 1_000);

/// Where replies are routed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyDestinationMode {
    /// A pre-provisioned queue shared by every call from this gateway.
    Fixed(Destination),
    /// A transport-managed temporary destination per call.
    Temporary,
}

/// Where correlation ids come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CorrelationIdMode {
    /// The gateway always generates ids; caller-supplied ids are rejected.
    #[default]
    Generated,
    /// Caller-supplied ids are used when given; otherwise one is generated.
    CallerSupplied,
}

/// Validated gateway configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Per-call timeout used when a call does not override it.
    pub timeout: Duration,
    /// Reply routing.
    pub reply_destination: ReplyDestinationMode,
    /// Correlation id policy.
    pub correlation_ids: CorrelationIdMode,
    /// Interval between expiry sweeps.
    pub reap_interval: Duration,
}

impl GatewayConfig {
    /// Create a configuration with the default id policy and reap interval.
    #[must_use]
    pub fn new(timeout: Duration, reply_destination: ReplyDestinationMode) -> Self {
        Self {
            timeout,
            reply_destination,
            correlation_ids: CorrelationIdMode::default(),
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroTimeout`] or
    /// [`ConfigError::ZeroReapInterval`] for zero durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::ZeroReapInterval);
        }
        Ok(())
    }
}
