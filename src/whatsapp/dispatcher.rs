//! Outbound reply dispatch.
//!
//! One message per logical reply, sent immediately. A closed channel is a
//! soft failure (the reply is undeliverable and the caller moves on); every
//! other transport failure is returned so the caller can decide.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::connection::ConnectionManager;
use super::WhatsAppError;
use crate::types::OutboundMessage;

/// Result of a delivery attempt that did not fail hard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport.
    Sent,
    /// Dropped because the channel is not open.
    Undeliverable,
}

/// Sends text replies to contacts.
#[async_trait]
pub trait Replier: Send + Sync {
    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns a [`WhatsAppError`] for transport failures other than a
    /// closed channel.
    async fn deliver(&self, message: OutboundMessage) -> Result<Delivery, WhatsAppError>;

    /// Convenience wrapper around [`deliver`](Self::deliver).
    ///
    /// # Errors
    ///
    /// Same as [`deliver`](Self::deliver).
    async fn send_text(&self, to: &str, text: &str) -> Result<Delivery, WhatsAppError> {
        self.deliver(OutboundMessage::new(to, text)).await
    }
}

/// [`Replier`] backed by the connection manager.
#[derive(Debug, Clone)]
pub struct OutboundDispatcher {
    connection: Arc<ConnectionManager>,
}

impl OutboundDispatcher {
    /// Dispatch through the given connection.
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Replier for OutboundDispatcher {
    async fn deliver(&self, message: OutboundMessage) -> Result<Delivery, WhatsAppError> {
        match self.connection.send(&message.to, &message.text).await {
            Ok(()) => {
                debug!(to = %message.to, "reply sent");
                Ok(Delivery::Sent)
            }
            Err(WhatsAppError::NotConnected) => {
                warn!(to = %message.to, "channel not open, reply dropped");
                Ok(Delivery::Undeliverable)
            }
            Err(e) => Err(e),
        }
    }
}
