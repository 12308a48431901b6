//! Connection lifecycle manager.
//!
//! The [`ConnectionManager`] owns the single live transport session. It
//! surfaces pairing artifacts, persists credential updates, feeds classified
//! inbound messages to the conversation layer, and reconnects after
//! transient closes with a fixed backoff. A remote logout is terminal: the
//! manager stops and waits for a new pairing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::auth::{AuthState, AuthStore};
use super::classifier;
use super::events::{CloseCause, ConnectionUpdate, InboundEvent, PairingArtifact, TransportEvent};
use super::pairing;
use super::transport::{Transport, TransportHandle};
use super::WhatsAppError;
use crate::config::WhatsAppConfig;
use crate::types::ClassifiedMessage;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Session opened, handshake or pairing in progress.
    Authenticating,
    /// Ready to send.
    Open,
    /// Shutting the session down.
    Closing,
}

/// Reconnect policy after transient closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay before each reconnect attempt.
    pub delay: Duration,
    /// Give up after this many consecutive failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Build the policy from configuration.
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.reconnect_limit(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: None,
        }
    }
}

/// Why [`ConnectionManager::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The session was logged out remotely; a new pairing is required.
    LoggedOut,
    /// [`ConnectionManager::shutdown`] was called.
    Shutdown,
    /// The configured reconnect attempt cap was reached.
    RetriesExhausted,
}

/// How one transport session ended.
enum SessionEnd {
    LoggedOut,
    Shutdown,
    Dropped { cause: CloseCause, was_open: bool },
}

struct Inner {
    state: ConnectionState,
    handle: Option<Arc<dyn TransportHandle>>,
    pairing: Option<PairingArtifact>,
}

/// Owns the live connection to the messaging network.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    auth_store: Arc<dyn AuthStore>,
    inbound_tx: mpsc::Sender<ClassifiedMessage>,
    policy: ReconnectPolicy,
    ready: AtomicBool,
    /// Uses a sync [`Mutex`] since every critical section is brief (no awaits).
    inner: Mutex<Inner>,
    stop_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("ready", &self.is_connected())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. Classified inbound messages are sent to `inbound_tx`.
    pub fn new(
        transport: Arc<dyn Transport>,
        auth_store: Arc<dyn AuthStore>,
        inbound_tx: mpsc::Sender<ClassifiedMessage>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            transport,
            auth_store,
            inbound_tx,
            policy,
            ready: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                handle: None,
                pairing: None,
            }),
            stop_tx,
        }
    }

    /// Whether the channel is open and can send.
    pub fn is_connected(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.lock_inner().state
    }

    /// The pairing artifact waiting to be scanned, if any.
    pub fn pairing_artifact(&self) -> Option<PairingArtifact> {
        self.lock_inner().pairing.clone()
    }

    /// Open one transport session with the stored credentials.
    ///
    /// Any previous session is closed first, so calling this again after a
    /// drop simply replaces the connection. Returns the session's event
    /// stream; [`run`](Self::run) drives it.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials cannot be loaded or the transport
    /// refuses the session.
    pub async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, WhatsAppError> {
        let auth = self.auth_store.load().await?;

        self.ready.store(false, Ordering::SeqCst);
        let previous = {
            let mut inner = self.lock_inner();
            inner.state = ConnectionState::Authenticating;
            inner.handle.take()
        };
        if let Some(previous) = previous {
            previous.close().await;
        }

        match self.transport.open(auth).await {
            Ok(opened) => {
                self.lock_inner().handle = Some(opened.handle);
                debug!("transport session opened");
                Ok(opened.events)
            }
            Err(e) => {
                self.lock_inner().state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Keep the connection alive until logout, shutdown, or the attempt cap.
    ///
    /// Every transient close or failed attempt waits for the policy delay
    /// and then calls [`start`](Self::start) again. Reaching `Open` resets
    /// the attempt counter.
    pub async fn run(self: Arc<Self>) -> RunExit {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut failures: u32 = 0;

        loop {
            if *stop_rx.borrow() {
                return RunExit::Shutdown;
            }

            match self.start().await {
                Ok(events) => match self.drive(events, &mut stop_rx).await {
                    SessionEnd::LoggedOut => return RunExit::LoggedOut,
                    SessionEnd::Shutdown => return RunExit::Shutdown,
                    SessionEnd::Dropped { cause, was_open } => {
                        if was_open {
                            failures = 0;
                        }
                        warn!(%cause, "connection closed");
                    }
                },
                Err(e) => warn!(error = %e, "connection attempt failed"),
            }

            failures = failures.saturating_add(1);
            if let Some(max) = self.policy.max_attempts {
                if failures >= max {
                    error!(attempts = failures, "reconnect attempts exhausted, giving up");
                    return RunExit::RetriesExhausted;
                }
            }

            info!(
                delay_ms = u64::try_from(self.policy.delay.as_millis()).unwrap_or(u64::MAX),
                attempt = failures,
                "reconnecting after backoff"
            );
            tokio::select! {
                () = tokio::time::sleep(self.policy.delay) => {}
                _ = stop_rx.changed() => return RunExit::Shutdown,
            }
        }
    }

    /// Send a text message over the open channel.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::NotConnected`] when the channel is not open,
    /// otherwise whatever the transport reports. No retry happens here.
    pub async fn send(&self, to: &str, text: &str) -> Result<(), WhatsAppError> {
        if !self.is_connected() {
            return Err(WhatsAppError::NotConnected);
        }
        let handle = self
            .lock_inner()
            .handle
            .clone()
            .ok_or(WhatsAppError::NotConnected)?;
        handle.send_text(to, text).await
    }

    /// Log the paired device out and stop.
    ///
    /// Clears stored credentials so the next start shows a fresh pairing
    /// artifact.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::NotConnected`] when no session is live, or
    /// the transport or auth store error.
    pub async fn logout(&self) -> Result<(), WhatsAppError> {
        let handle = self
            .lock_inner()
            .handle
            .clone()
            .ok_or(WhatsAppError::NotConnected)?;
        handle.logout().await?;
        self.auth_store.save(&AuthState::default()).await?;
        self.shutdown().await;
        info!("session logged out locally");
        Ok(())
    }

    /// Stop the run loop and close the live session.
    pub async fn shutdown(&self) {
        self.stop_tx.send_replace(true);
        self.close_current().await;
        info!("connection shut down");
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        mut events: mpsc::Receiver<TransportEvent>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut was_open = false;
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = stop_rx.changed() => {
                    self.close_current().await;
                    return SessionEnd::Shutdown;
                }
            };

            let Some(event) = event else {
                // Stream ended without a close event.
                self.mark_closed();
                return SessionEnd::Dropped {
                    cause: CloseCause::ConnectionLost,
                    was_open,
                };
            };

            match event {
                TransportEvent::Pairing(artifact) => self.on_pairing(artifact),
                TransportEvent::Connection(ConnectionUpdate::Connecting) => {
                    self.lock_inner().state = ConnectionState::Authenticating;
                }
                TransportEvent::Connection(ConnectionUpdate::Open) => {
                    was_open = true;
                    self.on_open();
                }
                TransportEvent::Connection(ConnectionUpdate::Closed(cause)) => {
                    self.mark_closed();
                    if cause.is_logged_out() {
                        self.lock_inner().pairing = None;
                        error!("session logged out remotely; a new pairing is required");
                        return SessionEnd::LoggedOut;
                    }
                    return SessionEnd::Dropped { cause, was_open };
                }
                TransportEvent::Credentials(state) => {
                    // Not retried: the next successful save corrects any drift.
                    if let Err(e) = self.auth_store.save(&state).await {
                        warn!(error = %e, "failed to persist credential update");
                    }
                }
                TransportEvent::Messages(batch) => self.on_messages(&batch).await,
            }
        }
    }

    fn on_pairing(&self, artifact: PairingArtifact) {
        pairing::display(&artifact);
        let mut inner = self.lock_inner();
        inner.state = ConnectionState::Authenticating;
        inner.pairing = Some(artifact);
    }

    fn on_open(&self) {
        {
            let mut inner = self.lock_inner();
            inner.state = ConnectionState::Open;
            inner.pairing = None;
        }
        self.ready.store(true, Ordering::SeqCst);
        info!("WhatsApp connection open");
    }

    async fn on_messages(&self, batch: &InboundEvent) {
        for message in classifier::classify(batch) {
            debug!(sender_id = %message.sender_id, "inbound message classified");
            if self.inbound_tx.send(message).await.is_err() {
                warn!("inbound channel closed, dropping message");
            }
        }
    }

    fn mark_closed(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let mut inner = self.lock_inner();
        inner.state = ConnectionState::Disconnected;
        inner.handle = None;
    }

    async fn close_current(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let handle = {
            let mut inner = self.lock_inner();
            inner.state = ConnectionState::Closing;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            handle.close().await;
        }
        self.lock_inner().state = ConnectionState::Disconnected;
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
