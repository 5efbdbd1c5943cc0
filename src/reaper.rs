//! Background sweep of expired pending requests.

use std::{sync::Arc, time::Duration};

use log::{debug, info};
use tokio::{
    select,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{error::ConfigError, pending::PendingTable};

/// Periodically fails pending requests whose deadline has passed.
///
/// Callers awaiting through the gateway also enforce their own deadline, so
/// the reaper mainly collects entries whose waiter stopped polling.
#[derive(Debug)]
pub struct ExpiryReaper {
    table: Arc<PendingTable>,
    interval: Duration,
}

impl ExpiryReaper {
    /// Create a reaper sweeping `table` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroReapInterval`] if `interval` is zero.
    pub fn new(table: Arc<PendingTable>, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroReapInterval);
        }
        Ok(Self { table, interval })
    }

    /// Run one sweep as of `now`, returning how many entries expired.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired = self.table.expire_older_than(now);
        if !expired.is_empty() {
            info!("expired {} pending request(s): {expired:?}", expired.len());
        }
        expired.len()
    }

    /// Spawn the sweep loop onto the current runtime.
    ///
    /// The loop stops when the returned handle is shut down or dropped.
    #[must_use]
    pub fn spawn(self) -> ReaperHandle {
        let token = CancellationToken::new();
        let join = tokio::spawn(self.run(token.clone()));
        ReaperHandle {
            join,
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("expiry reaper started with interval {:?}", self.interval);
        loop {
            select! {
                biased;
                () = shutdown.cancelled() => break,
                now = ticker.tick() => {
                    self.sweep(now);
                }
            }
        }
        debug!("expiry reaper stopped");
    }
}

/// Handle to a running [`ExpiryReaper`].
#[derive(Debug)]
pub struct ReaperHandle {
    join: JoinHandle<()>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its loop to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.join.await {
            log::warn!("expiry reaper task failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{correlation::CorrelationId, error::CallError};

    #[fixture]
    fn table() -> Arc<PendingTable> { Arc::new(PendingTable::new()) }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn sweep_expires_overdue_entries(table: Arc<PendingTable>) {
        let reaper = ExpiryReaper::new(Arc::clone(&table), Duration::from_millis(10))
            .expect("valid interval");
        let id = CorrelationId::parse("stale").expect("valid id");
        let slot = table
            .register(id, Duration::from_millis(5))
            .expect("register failed");

        assert_eq!(reaper.sweep(Instant::now()), 0);
        time::advance(Duration::from_millis(5)).await;
        assert_eq!(reaper.sweep(Instant::now()), 1);
        assert!(matches!(slot.await, Err(CallError::RequestTimeout { .. })));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn running_reaper_completes_abandoned_waiters(table: Arc<PendingTable>) {
        let handle = ExpiryReaper::new(Arc::clone(&table), Duration::from_millis(50))
            .expect("valid interval")
            .spawn();
        let id = CorrelationId::parse("forgotten").expect("valid id");
        let slot = table
            .register(id, Duration::from_millis(120))
            .expect("register failed");

        // Await the raw slot: only the reaper can time it out.
        let result = slot.await;

        assert!(matches!(result, Err(CallError::RequestTimeout { .. })));
        assert!(table.is_empty());
        handle.shutdown().await;
    }

    #[rstest]
    #[tokio::test]
    async fn shutdown_stops_loop(table: Arc<PendingTable>) {
        let handle = ExpiryReaper::new(table, Duration::from_millis(5))
            .expect("valid interval")
            .spawn();
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("reaper did not stop");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = ExpiryReaper::new(Arc::new(PendingTable::new()), Duration::ZERO);
        assert!(matches!(result, Err(ConfigError::ZeroReapInterval)));
    }
}
