//! Events delivered by a transport to the connection manager.
//!
//! Raw message records mirror the shape the messaging library emits
//! (`key.remoteJid`, `message.conversation`, `messageTimestamp`, ...) so a
//! bridge can forward them without reshaping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::auth::AuthState;

/// One event from the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new pairing code/QR payload must be shown to the operator.
    Pairing(PairingArtifact),
    /// The connection changed state.
    Connection(ConnectionUpdate),
    /// Credential material changed and must be persisted.
    Credentials(AuthState),
    /// A batch of inbound message records.
    Messages(InboundEvent),
}

/// Connection status reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// Handshake in progress.
    Connecting,
    /// The channel is open and can send.
    Open,
    /// The channel closed for the given cause.
    Closed(CloseCause),
}

/// Why a connection closed.
///
/// Status codes follow the messaging library's disconnect reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// Credentials were revoked on the phone. Terminal.
    LoggedOut,
    /// Network drop or keep-alive timeout.
    ConnectionLost,
    /// The server closed the socket.
    ConnectionClosed,
    /// Another client took over this session.
    ConnectionReplaced,
    /// The server asked for a restart (normal after pairing).
    RestartRequired,
    /// Session material is corrupt on the server side.
    BadSession,
    /// No cause was reported.
    Unknown,
    /// Any other status code.
    Other(u16),
}

impl CloseCause {
    /// Map a disconnect status code to a cause.
    pub fn from_status(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(408) => Self::ConnectionLost,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(515) => Self::RestartRequired,
            Some(other) => Self::Other(other),
            None => Self::Unknown,
        }
    }

    /// Whether this cause ends the session for good.
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::ConnectionReplaced => write!(f, "connection replaced"),
            Self::RestartRequired => write!(f, "restart required"),
            Self::BadSession => write!(f, "bad session"),
            Self::Unknown => write!(f, "unknown"),
            Self::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// One-time pairing payload shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingArtifact {
    /// QR payload or numeric pairing code.
    pub code: String,
    /// When the transport produced it.
    pub received_at: DateTime<Utc>,
}

impl PairingArtifact {
    /// Wrap a code received just now.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            received_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound batches
// ---------------------------------------------------------------------------

/// Kind of an inbound batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Live messages.
    Notify,
    /// Messages appended from another linked device or history.
    Append,
    /// Anything else (history sync, replays).
    #[serde(other)]
    Other,
}

/// A raw batch of inbound message records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Batch kind.
    #[serde(rename = "type")]
    pub kind: BatchKind,
    /// Records in arrival order.
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

/// A raw message record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    /// Addressing information.
    #[serde(default)]
    pub key: MessageKey,
    /// Message content, absent for protocol/stub records.
    #[serde(default)]
    pub message: Option<MessageContent>,
    /// Server timestamp in Unix seconds.
    #[serde(default, deserialize_with = "de_timestamp")]
    pub message_timestamp: Option<u64>,
}

/// Addressing part of a raw record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat the record belongs to.
    #[serde(default)]
    pub remote_jid: Option<String>,
    /// Whether our own account sent it.
    #[serde(default)]
    pub from_me: bool,
    /// Human author behind a group, broadcast or linked identity.
    #[serde(default)]
    pub participant: Option<String>,
    /// Record identifier.
    #[serde(default)]
    pub id: Option<String>,
}

/// Content part of a raw record. Only text variants are modelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    /// Plain conversation text.
    #[serde(default)]
    pub conversation: Option<String>,
    /// Text with a preview, quote, or mention.
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
}

/// Extended text payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedText {
    /// Message text.
    #[serde(default)]
    pub text: Option<String>,
}

/// Accept timestamps as numbers or numeric strings (some library versions
/// serialise 64-bit values as strings).
fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
