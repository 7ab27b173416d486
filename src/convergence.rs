//! Convergence watcher
//!
//! Polls a declaration until the connector controller reports it connected.
//! The wait is bounded by an iteration count with a fixed interval, no
//! backoff, and can be interrupted through a cancellation token.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, ShortcutError};
use crate::shortcuts::ConnectionStore;

/// Interval between two status reads
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a convergence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// The declaration reports `isConnected`
    Connected,
    /// The budget was exhausted; the declaration is left in place
    TimedOut { attempts: u32 },
    /// The wait was interrupted; the declaration is left in place
    Cancelled,
}

/// Waits for a declaration to become connected
#[derive(Clone)]
pub struct ConvergenceWatcher<S> {
    store: S,
    poll_interval: Duration,
}

impl<S: ConnectionStore> ConvergenceWatcher<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Read the declaration's status up to `attempts` times.
    pub async fn wait(
        &self,
        namespace: &str,
        name: &str,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Ok(Convergence::Cancelled);
            }

            let connection = self.store.get(namespace, name).await?.ok_or_else(|| {
                ShortcutError::DeclarationGone {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            })?;

            if connection.is_connected() {
                info!(namespace = %namespace, name = %name, attempt, "Connection established");
                return Ok(Convergence::Connected);
            }

            if attempt % 10 == 0 {
                info!(
                    namespace = %namespace,
                    name = %name,
                    phase = %connection.phase(),
                    "Waiting for connection (attempt {})",
                    attempt
                );
            } else {
                debug!(namespace = %namespace, name = %name, attempt, "Not connected yet");
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(Convergence::Cancelled),
                _ = sleep(self.poll_interval) => {}
            }
        }

        Ok(Convergence::TimedOut { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connection, FakeConnections};

    fn watcher(store: &FakeConnections) -> ConvergenceWatcher<FakeConnections> {
        ConvergenceWatcher::new(store.clone()).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_connected_as_soon_as_flag_flips() {
        let store = FakeConnections::default();
        store.insert(connection("default", "east", "west"));
        store.connect_after(3);

        let outcome = watcher(&store)
            .wait("default", "east-west", 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Convergence::Connected);
        assert_eq!(store.gets(), 3);
    }

    #[tokio::test]
    async fn test_times_out_after_exact_attempts() {
        let store = FakeConnections::default();
        store.insert(connection("default", "east", "west"));

        let outcome = watcher(&store)
            .wait("default", "east-west", 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Convergence::TimedOut { attempts: 5 });
        assert_eq!(store.gets(), 5);
        assert_eq!(store.items().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_never_polls() {
        let store = FakeConnections::default();
        store.insert(connection("default", "east", "west"));

        let outcome = watcher(&store)
            .wait("default", "east-west", 0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Convergence::TimedOut { attempts: 0 });
        assert_eq!(store.gets(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let store = FakeConnections::default();
        store.insert(connection("default", "east", "west"));
        let cancel = CancellationToken::new();

        let slow = ConvergenceWatcher::new(store.clone()).with_poll_interval(Duration::from_secs(3600));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = slow.wait("default", "east-west", 120, &cancel).await.unwrap();
        assert_eq!(outcome, Convergence::Cancelled);
        assert_eq!(store.gets(), 1);
    }

    #[tokio::test]
    async fn test_vanished_declaration_is_an_error() {
        let store = FakeConnections::default();

        let result = watcher(&store)
            .wait("default", "east-west", 3, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ShortcutError::DeclarationGone { .. })));
    }
}
