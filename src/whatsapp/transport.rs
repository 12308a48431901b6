//! Transport boundary and the HTTP bridge implementation.
//!
//! The messaging wire protocol is provided by a library running in a local
//! bridge sidecar. [`Transport::open`] starts one session on the bridge and
//! returns a send handle plus the stream of [`TransportEvent`]s for that
//! session. The event stream ends after a close event or when the bridge
//! becomes unreachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::auth::AuthState;
use super::events::{CloseCause, ConnectionUpdate, InboundEvent, PairingArtifact, TransportEvent};
use super::WhatsAppError;

/// Capacity of the per-session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Long-poll timeout for the event stream.
const POLL_TIMEOUT_SECS: u64 = 60;

/// Pause after a non-success poll response.
const POLL_ERROR_PAUSE_SECS: u64 = 5;

/// Maximum characters of an error body kept in [`WhatsAppError::Bridge`].
const MAX_ERROR_BODY_CHARS: usize = 256;

/// A freshly opened transport session.
pub struct OpenedTransport {
    /// Handle used to send and to close the session.
    pub handle: Arc<dyn TransportHandle>,
    /// Events for this session, in order.
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for OpenedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedTransport").finish_non_exhaustive()
    }
}

/// Opens sessions against the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session with the given credential state.
    ///
    /// # Errors
    ///
    /// Returns a [`WhatsAppError`] if the session cannot be started.
    async fn open(&self, auth: AuthState) -> Result<OpenedTransport, WhatsAppError>;
}

/// Live handle to one open session. Owned by the connection manager.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::NotConnected`] when the session cannot send,
    /// or another error for transport failures.
    async fn send_text(&self, to: &str, text: &str) -> Result<(), WhatsAppError>;

    /// Revoke the session's credentials on the network side.
    ///
    /// # Errors
    ///
    /// Returns a [`WhatsAppError`] if the logout request fails.
    async fn logout(&self) -> Result<(), WhatsAppError>;

    /// Stop the session's event stream and release resources.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// Bridge wire format
// ---------------------------------------------------------------------------

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    #[allow(dead_code)]
    data: Option<T>,
    error: Option<String>,
}

/// Event as serialised by the bridge.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// New QR payload or pairing code.
    Qr {
        /// Payload to display.
        code: String,
    },
    /// Connection state change.
    Connection {
        /// New state.
        state: BridgeLinkState,
        /// Disconnect status code when `state` is `close`.
        #[serde(default)]
        status_code: Option<u16>,
    },
    /// Credential update.
    Creds {
        /// Full credential state after the update.
        state: AuthState,
    },
    /// Inbound message batch.
    Messages {
        /// The batch.
        batch: InboundEvent,
    },
}

/// Connection states as named by the bridge.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeLinkState {
    /// Handshake in progress.
    Connecting,
    /// Open.
    Open,
    /// Closed.
    Close,
}

impl From<BridgeEvent> for TransportEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { code } => Self::Pairing(PairingArtifact::new(code)),
            BridgeEvent::Connection { state, status_code } => Self::Connection(match state {
                BridgeLinkState::Connecting => ConnectionUpdate::Connecting,
                BridgeLinkState::Open => ConnectionUpdate::Open,
                BridgeLinkState::Close => {
                    ConnectionUpdate::Closed(CloseCause::from_status(status_code))
                }
            }),
            BridgeEvent::Creds { state } => Self::Credentials(state),
            BridgeEvent::Messages { batch } => Self::Messages(batch),
        }
    }
}

/// Parse one poll response body into transport events.
///
/// # Errors
///
/// Returns the JSON error if the body is not an array of bridge events.
pub fn parse_poll_body(body: &str) -> Result<Vec<TransportEvent>, serde_json::Error> {
    let events: Vec<BridgeEvent> = serde_json::from_str(body)?;
    Ok(events.into_iter().map(TransportEvent::from).collect())
}

// ---------------------------------------------------------------------------
// HTTP bridge transport
// ---------------------------------------------------------------------------

/// [`Transport`] backed by the local bridge sidecar.
#[derive(Debug, Clone)]
pub struct HttpBridgeTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBridgeTransport {
    /// Create a transport pointing at the given bridge base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpBridgeTransport {
    async fn open(&self, auth: AuthState) -> Result<OpenedTransport, WhatsAppError> {
        let url = format!("{}/session", self.base_url);
        let registered = auth.is_registered();
        let body = serde_json::json!({ "auth": auth });
        let resp = self.client.post(&url).json(&body).send().await?;
        ensure_success(resp).await?;
        info!(bridge = %self.base_url, registered, "bridge session opened");

        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let listener = spawn_event_listener(self.base_url.clone(), event_tx);

        let handle = BridgeHandle {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            listener,
        };
        Ok(OpenedTransport {
            handle: Arc::new(handle),
            events,
        })
    }
}

/// Send handle for a bridge session.
struct BridgeHandle {
    client: reqwest::Client,
    base_url: String,
    listener: JoinHandle<()>,
}

#[async_trait]
impl TransportHandle for BridgeHandle {
    async fn send_text(&self, to: &str, text: &str) -> Result<(), WhatsAppError> {
        let url = format!("{}/send", self.base_url);
        let body = serde_json::json!({ "jid": to, "text": text });
        let resp = self.client.post(&url).json(&body).send().await?;
        ensure_success(resp).await?;
        debug!(to, "message sent via bridge");
        Ok(())
    }

    async fn logout(&self) -> Result<(), WhatsAppError> {
        let url = format!("{}/logout", self.base_url);
        let resp = self.client.post(&url).send().await?;
        ensure_success(resp).await?;
        info!(bridge = %self.base_url, "bridge session logged out");
        Ok(())
    }

    async fn close(&self) {
        self.listener.abort();
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Map a bridge response to `Ok` or a structured error.
///
/// `409 Conflict` and `503 Service Unavailable` mean the bridge has no open
/// socket right now.
async fn ensure_success(resp: reqwest::Response) -> Result<(), WhatsAppError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    if status == reqwest::StatusCode::CONFLICT || status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(WhatsAppError::NotConnected);
    }
    let raw = resp.text().await.unwrap_or_default();
    let body = match serde_json::from_str::<BridgeResponse<serde_json::Value>>(&raw) {
        Ok(envelope) => envelope.error.unwrap_or(raw),
        Err(_) => raw,
    };
    Err(WhatsAppError::Bridge {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    })
}

/// Spawn the long-poll listener for one bridge session.
///
/// Poll timeouts are normal and retried immediately. A hard network error
/// is reported as a lost connection and ends the stream; reconnecting is
/// the connection manager's decision. The listener also stops after
/// forwarding a close event, or when the receiver is dropped.
fn spawn_event_listener(base_url: String, event_tx: mpsc::Sender<TransportEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{base_url}/events/poll");
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "failed to build poll client");
                let lost = TransportEvent::Connection(ConnectionUpdate::Closed(CloseCause::ConnectionLost));
                let _ = event_tx.send(lost).await;
                return;
            }
        };

        loop {
            match client.get(&poll_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = match resp.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            debug!(error = %e, "failed to read poll body");
                            tokio::time::sleep(Duration::from_secs(POLL_ERROR_PAUSE_SECS)).await;
                            continue;
                        }
                    };
                    let events = match parse_poll_body(&body) {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(error = %e, "unparseable bridge events, skipping batch");
                            tokio::time::sleep(Duration::from_secs(POLL_ERROR_PAUSE_SECS)).await;
                            continue;
                        }
                    };
                    for event in events {
                        let closes = matches!(
                            event,
                            TransportEvent::Connection(ConnectionUpdate::Closed(_))
                        );
                        if event_tx.send(event).await.is_err() {
                            // Receiver dropped, session replaced.
                            return;
                        }
                        if closes {
                            return;
                        }
                    }
                }
                Ok(resp) => {
                    debug!(status = %resp.status(), "event poll returned non-200");
                    tokio::time::sleep(Duration::from_secs(POLL_ERROR_PAUSE_SECS)).await;
                }
                Err(e) if e.is_timeout() => {
                    // Long-poll window expired with no events.
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "bridge event stream failed");
                    let lost =
                        TransportEvent::Connection(ConnectionUpdate::Closed(CloseCause::ConnectionLost));
                    let _ = event_tx.send(lost).await;
                    return;
                }
            }
        }
    })
}
