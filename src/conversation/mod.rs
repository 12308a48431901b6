//! Conversation layer: per-contact state machine and per-contact routing.
//!
//! The [`router::ConversationRouter`] gives every contact its own Tokio task
//! so turns from one contact never interleave. Each turn runs through
//! [`engine::ConversationEngine::handle`].

pub mod engine;
pub mod intent;
pub mod replies;
pub mod router;
pub mod state;

use crate::actions::ActionError;
use crate::nlu::NluError;
use crate::store::StoreError;
use crate::whatsapp::WhatsAppError;

/// Errors that fail one conversation turn.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    /// Session or account store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// NLU failure or timeout.
    #[error("NLU error: {0}")]
    Nlu(#[from] NluError),

    /// The confirmed action failed.
    #[error("action error: {0}")]
    Action(#[from] ActionError),

    /// A reply could not be sent.
    #[error("reply error: {0}")]
    Reply(#[from] WhatsAppError),

    /// The contact's worker could not accept the message.
    #[error("conversation worker unavailable for {0}")]
    WorkerUnavailable(String),
}
