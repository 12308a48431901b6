//! WhatsApp adapter: transport boundary, connection lifecycle, inbound
//! classification, pairing display, and outbound dispatch.
//!
//! The wire protocol itself lives behind the [`transport::Transport`] trait.
//! The shipped implementation talks to a local bridge sidecar over HTTP and
//! long-polling; everything above it is transport-agnostic.

pub mod auth;
pub mod classifier;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod jid;
pub mod pairing;
pub mod transport;

/// Errors from the WhatsApp adapter.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to the bridge failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The channel is not open; the message cannot be delivered right now.
    #[error("not connected to WhatsApp")]
    NotConnected,

    /// The bridge answered with an error status.
    #[error("bridge returned status {status}: {body}")]
    Bridge {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Credential state could not be loaded or saved.
    #[error("auth store error: {0}")]
    AuthStore(String),

    /// The pairing artifact could not be rendered.
    #[error("pairing render failed: {0}")]
    Pairing(String),
}
