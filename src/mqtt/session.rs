//! Transport session state machine
//!
//! ```text
//!                open()                 handshake ok
//! Disconnected ─────────► Connecting ─────────────────► Connected
//!      ▲                      │                             │
//!      └──── handshake fails ─┘                             │ publish fails
//!                             ▲                             ▼
//!                             └───────── open() ──────── Degraded
//! ```
//!
//! The manager owns the only link to the broker. A publish while not
//! `Connected` is dropped, never queued; the scheduler produces fresh data on
//! its next tick instead of replaying.

use std::fmt;
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TelemetryError;
use crate::retry::RetryPolicy;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Degraded => "degraded",
        };
        write!(f, "{}", name)
    }
}

/// An established broker session
pub trait BrokerLink: Send {
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TelemetryError>> + Send;

    /// Best-effort orderly disconnect
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Performs the transport handshake and yields a link
pub trait Connector: Send + Sync {
    type Link: BrokerLink;

    fn connect(&self) -> impl Future<Output = Result<Self::Link, TelemetryError>> + Send;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

pub struct SessionManager<C: Connector> {
    connector: C,
    link: Option<C::Link>,
    retry: RetryPolicy,
    state_tx: watch::Sender<SessionState>,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C, retry: RetryPolicy) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            connector,
            link: None,
            retry,
            state_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected && self.link.is_some()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!("Session {} -> {}", previous, next);
        }
    }

    /// Establishes a fresh session, discarding any old link. Handshake
    /// failures are retried per the retry policy; only cancellation or an
    /// exhausted attempt bound returns an error.
    pub async fn open(&mut self, cancel: &CancellationToken) -> Result<(), TelemetryError> {
        if let Some(old) = self.link.take() {
            debug!("Discarding previous session");
            old.close().await;
        }

        let endpoint = self.connector.endpoint();
        info!("Connecting to {}", endpoint);

        let connector = &self.connector;
        let state_tx = &self.state_tx;
        let result = self
            .retry
            .run("connect", cancel, |attempt| {
                state_tx.send_replace(SessionState::Connecting);
                async move {
                    debug!("Connection attempt {}", attempt);
                    let outcome = connector.connect().await;
                    if outcome.is_err() {
                        state_tx.send_replace(SessionState::Disconnected);
                    }
                    outcome
                }
            })
            .await;

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.set_state(SessionState::Connected);
                info!("Connected to {}", endpoint);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                if !e.is_cancelled() {
                    error!("Giving up on {}: {}", endpoint, e);
                }
                Err(e)
            }
        }
    }

    /// Sends one message. A failure degrades the session and drops the link.
    pub async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TelemetryError> {
        let link = match (self.state(), self.link.as_mut()) {
            (SessionState::Connected, Some(link)) => link,
            (state, _) => {
                warn!("Dropping message for {}: session is {}", topic, state);
                return Err(TelemetryError::PublishFailure(format!(
                    "session is {}",
                    state
                )));
            }
        };

        match link.publish(topic, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set_state(SessionState::Degraded);
                if let Some(link) = self.link.take() {
                    link.close().await;
                }
                Err(match e {
                    TelemetryError::PublishFailure(_) => e,
                    other => TelemetryError::PublishFailure(other.to_string()),
                })
            }
        }
    }

    /// Closes the link on shutdown
    pub async fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.close().await;
            info!("Session to {} closed", self.connector.endpoint());
        }
        self.set_state(SessionState::Disconnected);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Event, FakeConnector};
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn open_retries_until_handshake_succeeds() {
        let connector = FakeConnector::new(&[false, false, false, true], &[]);
        let mut session = SessionManager::new(
            connector.clone(),
            RetryPolicy::fixed(Duration::from_secs(10)),
        );
        let start = tokio::time::Instant::now();

        session.open(&CancellationToken::new()).await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        let failures = connector
            .events()
            .iter()
            .filter(|e| matches!(e, Event::ConnectFailed(_)))
            .count();
        assert_eq!(failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_degrades_and_drops_link() {
        let connector = FakeConnector::new(&[], &[true, false]);
        let mut session = SessionManager::new(connector.clone(), RetryPolicy::default());
        session.open(&CancellationToken::new()).await.unwrap();

        session.publish("t", b"one".to_vec()).await.unwrap();
        let err = session.publish("t", b"two".to_vec()).await.unwrap_err();
        assert!(matches!(err, TelemetryError::PublishFailure(_)));
        assert_eq!(session.state(), SessionState::Degraded);
        assert!(!session.is_connected());

        // dropped, not queued
        assert!(session.publish("t", b"three".to_vec()).await.is_err());
        let published = connector
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Published { .. }))
            .count();
        assert_eq!(published, 1);

        session.open(&CancellationToken::new()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_before_open_is_dropped() {
        let mut session = SessionManager::new(FakeConnector::default(), RetryPolicy::default());
        assert!(session.publish("t", Vec::new()).await.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_observable() {
        let connector = FakeConnector::new(&[false, true], &[]);
        let mut session =
            SessionManager::new(connector, RetryPolicy::fixed(Duration::from_secs(1)));
        let rx = session.subscribe();
        assert_eq!(*rx.borrow(), SessionState::Disconnected);

        session.open(&CancellationToken::new()).await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Connected);

        session.close().await;
        assert_eq!(*rx.borrow(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn open_stops_on_cancel() {
        let connector = FakeConnector::new(&[false; 100], &[]);
        let mut session =
            SessionManager::new(connector, RetryPolicy::fixed(Duration::from_secs(10)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(35)).await;
            trigger.cancel();
        });

        let err = session.open(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
