//! Builder for configuring and starting a [`RequestGateway`].

use std::{fmt, sync::Arc, time::Duration};

use super::RequestGateway;
use crate::{
    config::{CorrelationIdMode, DEFAULT_REAP_INTERVAL, GatewayConfig, ReplyDestinationMode},
    correlation::{CorrelationIdSource, RandomIdSource},
    error::{ConfigError, GatewayError},
    message::Destination,
    transport::Transport,
};

/// Builder for [`RequestGateway`].
///
/// A request timeout and a reply destination mode are required; everything
/// else has a default. Construct via [`RequestGateway::builder`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use inout::{gateway::RequestGateway, message::Destination, transport::InMemoryBroker};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let gateway = RequestGateway::builder(InMemoryBroker::new())
///     .timeout(Duration::from_secs(5))
///     .reply_to(Destination::new("queue.response"))
///     .caller_supplied_ids()
///     .start()
///     .await
///     .expect("failed to start gateway");
/// # gateway.shutdown().await;
/// # }
/// ```
pub struct GatewayBuilder<T> {
    transport: Arc<T>,
    timeout: Option<Duration>,
    reply_destination: Option<ReplyDestinationMode>,
    correlation_ids: CorrelationIdMode,
    reap_interval: Duration,
    id_source: Arc<dyn CorrelationIdSource>,
}

impl<T> fmt::Debug for GatewayBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("timeout", &self.timeout)
            .field("reply_destination", &self.reply_destination)
            .field("correlation_ids", &self.correlation_ids)
            .field("reap_interval", &self.reap_interval)
            .field("id_source", &"<source>")
            .finish_non_exhaustive()
    }
}

impl<T: Transport> GatewayBuilder<T> {
    pub(super) fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            timeout: None,
            reply_destination: None,
            correlation_ids: CorrelationIdMode::default(),
            reap_interval: DEFAULT_REAP_INTERVAL,
            id_source: Arc::new(RandomIdSource),
        }
    }

    /// Set the per-call timeout used when a call does not override it.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Route every reply to the fixed queue `destination`.
    #[must_use]
    pub fn reply_to(mut self, destination: Destination) -> Self {
        self.reply_destination = Some(ReplyDestinationMode::Fixed(destination));
        self
    }

    /// Route each reply to a temporary destination provisioned per call.
    #[must_use]
    pub fn temporary_replies(mut self) -> Self {
        self.reply_destination = Some(ReplyDestinationMode::Temporary);
        self
    }

    /// Choose where correlation ids come from.
    #[must_use]
    pub fn correlation_ids(mut self, mode: CorrelationIdMode) -> Self {
        self.correlation_ids = mode;
        self
    }

    /// Shorthand for [`CorrelationIdMode::CallerSupplied`].
    #[must_use]
    pub fn caller_supplied_ids(self) -> Self { self.correlation_ids(CorrelationIdMode::CallerSupplied) }

    /// Set the interval between expiry sweeps.
    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Replace the generator used for correlation ids.
    #[must_use]
    pub fn id_source(mut self, source: impl CorrelationIdSource + 'static) -> Self {
        self.id_source = Arc::new(source);
        self
    }

    /// Apply every field of an existing configuration.
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.timeout = Some(config.timeout);
        self.reply_destination = Some(config.reply_destination);
        self.correlation_ids = config.correlation_ids;
        self.reap_interval = config.reap_interval;
        self
    }

    /// Validate the collected settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingTimeout`] or
    /// [`ConfigError::MissingReplyDestination`] when a required setting was
    /// never given, and the errors of [`GatewayConfig::validate`].
    pub fn build_config(&self) -> Result<GatewayConfig, ConfigError> {
        let timeout = self.timeout.ok_or(ConfigError::MissingTimeout)?;
        let reply_destination = self
            .reply_destination
            .clone()
            .ok_or(ConfigError::MissingReplyDestination)?;
        let config = GatewayConfig {
            timeout,
            reply_destination,
            correlation_ids: self.correlation_ids,
            reap_interval: self.reap_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, subscribe to the fixed reply destination
    /// (if any) and start the expiry reaper.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for invalid settings and
    /// [`GatewayError::Subscribe`] if the transport refuses the reply
    /// subscription.
    pub async fn start(self) -> Result<RequestGateway<T>, GatewayError> {
        let config = self.build_config()?;
        RequestGateway::start_with(self.transport, config, self.id_source).await
    }
}
