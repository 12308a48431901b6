//! Message types shared between the WhatsApp layer and the conversation engine.

use serde::{Deserialize, Serialize};

/// An inbound message that survived classification.
///
/// `sender_id` is the canonical address of the human author (a
/// phone-number-like JID). This value is derived per event and never
/// persisted by the WhatsApp layer itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedMessage {
    /// Canonical sender address.
    pub sender_id: String,
    /// Plain-text payload.
    pub text: String,
    /// Server timestamp in Unix seconds (`0` when the record carried none).
    pub timestamp_seconds: u64,
}

/// A single text reply addressed to one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination address.
    pub to: String,
    /// Reply text.
    pub text: String,
}

impl OutboundMessage {
    /// Build an outbound message.
    pub fn new(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            text: text.into(),
        }
    }
}
