//! Session lifecycle with indefinite reconnect
//!
//! The manager is a small state machine: `Disconnected → Connecting →
//! Connected`. `connect` loops until the connector hands out a session,
//! sleeping a fixed delay between attempts. There is no attempt limit, so
//! `connect` only returns once a session is open.

use docket_common::{DocketError, DriverError, ErrorKind, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::driver::{Connector, Session};

/// Delay between two connection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Delay strategy for the reconnect loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Same delay after every failed attempt
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay to wait after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.delay
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Lifecycle state of the managed session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Slot<S> {
    state: ConnectionState,
    session: Option<Arc<S>>,
}

/// Owner of the single database session
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    slot: RwLock<Slot<C::Session>>,
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            policy,
            slot: RwLock::new(Slot {
                state: ConnectionState::Disconnected,
                session: None,
            }),
        }
    }

    /// Open a session, retrying until it succeeds
    ///
    /// Failures are logged and retried after the policy delay; this method
    /// never returns an error. Concurrent calls are not coordinated: each
    /// runs its own loop and the last one to succeed installs its session.
    #[instrument(skip(self, url))]
    pub async fn connect(&self, url: &str, database: &str) -> Arc<C::Session> {
        self.slot.write().state = ConnectionState::Connecting;

        let mut attempt: u32 = 0;
        loop {
            info!(attempt, "Connecting to database...");

            match self.connector.connect(url, database).await {
                Ok(session) => {
                    let session = Arc::new(session);
                    let mut slot = self.slot.write();
                    if slot.session.replace(Arc::clone(&session)).is_some() {
                        info!("Replacing previously active session");
                    }
                    slot.state = ConnectionState::Connected;
                    info!(attempt, "Connection established");
                    return session;
                }
                Err(err) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Can't connect to database, restarting connection"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Close the active session
    ///
    /// # Errors
    /// `disconnectError` when no session is active or closing fails.
    pub async fn disconnect(&self) -> Result<()> {
        let session = {
            let mut slot = self.slot.write();
            slot.state = ConnectionState::Disconnected;
            slot.session.take()
        };

        let session = session
            .ok_or_else(|| DocketError::driver(ErrorKind::Disconnect, DriverError::NotConnected))?;

        session
            .close()
            .await
            .map_err(|err| DocketError::driver(ErrorKind::Disconnect, err))?;

        info!("Disconnected from database");
        Ok(())
    }

    /// The active session; fails immediately when there is none
    pub fn session(&self) -> std::result::Result<Arc<C::Session>, DriverError> {
        self.slot.read().session.clone().ok_or(DriverError::NotConnected)
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.slot.read().session.is_some()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryConnector, Operation};

    #[test]
    fn test_default_policy_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let manager = ConnectionManager::new(MemoryConnector::new(), ReconnectPolicy::default());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(manager.session(), Err(DriverError::NotConnected)));

        manager.connect("memory://", "app").await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.is_connected());

        manager.disconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let manager = ConnectionManager::new(MemoryConnector::new(), ReconnectPolicy::default());
        let err = manager.disconnect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Disconnect);
        assert_eq!(err.driver_error(), Some(&DriverError::NotConnected));
    }

    #[tokio::test]
    async fn test_second_disconnect_fails() {
        let manager = ConnectionManager::new(MemoryConnector::new(), ReconnectPolicy::default());
        manager.connect("memory://", "app").await;
        manager.disconnect().await.unwrap();
        assert_eq!(manager.disconnect().await.unwrap_err().kind(), ErrorKind::Disconnect);
    }

    #[tokio::test]
    async fn test_close_failure_is_disconnect_error() {
        let connector = MemoryConnector::new();
        let manager = ConnectionManager::new(connector.clone(), ReconnectPolicy::default());
        manager.connect("memory://", "app").await;

        connector.fail_next(Operation::Close, DriverError::Other("socket reset".to_string()));
        let err = manager.disconnect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Disconnect);
        assert_eq!(err.driver_error(), Some(&DriverError::Other("socket reset".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_with_fixed_delay() {
        let connector = MemoryConnector::new();
        connector.fail_connects(3);
        let manager = ConnectionManager::new(connector.clone(), ReconnectPolicy::default());

        let started = tokio::time::Instant::now();
        manager.connect("memory://", "app").await;

        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(connector.connect_attempts(), 4);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }
}
