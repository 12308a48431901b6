//! Business-action handlers run after a confirmed "sim".
//!
//! Handlers are keyed by [`Intent`] in an [`ActionRegistry`]. Each handler
//! sends its own completion message to the contact.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::conversation::intent::{field_label, Intent};
use crate::conversation::state::{display_value, Entities};
use crate::store::AccountId;
use crate::whatsapp::dispatcher::Replier;
use crate::whatsapp::WhatsAppError;

/// Errors from an action handler.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// No handler is registered for the intent.
    #[error("no handler registered for intent {0}")]
    NoHandler(Intent),

    /// A required entity was missing at execution time.
    #[error("missing entity: {0}")]
    MissingEntity(String),

    /// The record could not be written.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Entities could not be serialised.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The completion message could not be sent.
    #[error("reply failed: {0}")]
    Reply(#[from] WhatsAppError),
}

/// Everything a handler receives for one confirmed action.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    /// Contact that confirmed.
    pub sender_id: &'a str,
    /// Account the contact is linked to.
    pub account_id: &'a AccountId,
    /// Collected entities.
    pub entities: &'a Entities,
    /// Channel for the completion message.
    pub replier: &'a dyn Replier,
}

impl std::fmt::Debug for ActionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("sender_id", &self.sender_id)
            .field("account_id", &self.account_id)
            .field("entities", &self.entities)
            .finish_non_exhaustive()
    }
}

/// A handler for one confirmed intent.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action and send the completion message.
    ///
    /// Once the action has committed, the handler returns `Ok` even if the
    /// completion message cannot be delivered.
    ///
    /// # Errors
    ///
    /// Returns an [`ActionError`] if the action cannot be committed.
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<(), ActionError>;
}

/// Handlers keyed by intent.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<Intent, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut intents: Vec<&str> = self.handlers.keys().map(Intent::as_str).collect();
        intents.sort_unstable();
        f.debug_struct("ActionRegistry").field("intents", &intents).finish()
    }
}

impl ActionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers writing to `db`.
    pub fn with_defaults(db: SqlitePool) -> Self {
        let mut registry = Self::new();
        registry.register(Intent::CreateClient, Arc::new(RecordAction::new(db, Intent::CreateClient)));
        registry
    }

    /// Register (or replace) the handler for an intent.
    pub fn register(&mut self, intent: Intent, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(intent, handler);
    }

    /// Whether a handler exists for the intent.
    pub fn contains(&self, intent: Intent) -> bool {
        self.handlers.contains_key(&intent)
    }

    /// Run the handler for `intent`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NoHandler`] if none is registered, otherwise
    /// the handler's error.
    pub async fn execute(&self, intent: Intent, ctx: ActionContext<'_>) -> Result<(), ActionError> {
        let handler = self.handlers.get(&intent).ok_or(ActionError::NoHandler(intent))?;
        handler.execute(ctx).await
    }
}

// ---------------------------------------------------------------------------
// Built-in handler
// ---------------------------------------------------------------------------

/// Writes the entity map as a row of `business_records`.
#[derive(Debug, Clone)]
pub struct RecordAction {
    db: SqlitePool,
    intent: Intent,
}

impl RecordAction {
    /// Handler for `intent`, writing to `db`.
    pub fn new(db: SqlitePool, intent: Intent) -> Self {
        Self { db, intent }
    }
}

#[async_trait]
impl ActionHandler for RecordAction {
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<(), ActionError> {
        for field in self.intent.required_fields() {
            if !ctx.entities.contains_key(*field) {
                return Err(ActionError::MissingEntity((*field).to_owned()));
            }
        }

        let kind = self.intent.record_kind().unwrap_or(self.intent.as_str());
        let payload = serde_json::to_string(ctx.entities)?;
        let result = sqlx::query(
            "INSERT INTO business_records (account_id, kind, payload_json, created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(ctx.account_id.as_str())
        .bind(kind)
        .bind(&payload)
        .bind(ctx.sender_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        let record_id = result.last_insert_rowid();
        info!(record_id, account_id = %ctx.account_id, kind, "business record created");

        // The row is committed; a lost reply must not leave the confirmation pending.
        if let Err(e) = ctx
            .replier
            .send_text(ctx.sender_id, &completion_text(self.intent, ctx.entities))
            .await
        {
            warn!(record_id, error = %e, "record created but completion reply failed");
        }
        Ok(())
    }
}

fn completion_text(intent: Intent, entities: &Entities) -> String {
    match intent {
        Intent::CreateClient => {
            let name = entities.get("nome").map(display_value).unwrap_or_default();
            format!("✅ Cliente {name} cadastrado com sucesso!")
        }
        _ => {
            let summary: Vec<String> = entities
                .iter()
                .map(|(k, v)| format!("{}: {}", field_label(k), display_value(v)))
                .collect();
            format!("✅ Registro salvo ({}).", summary.join(", "))
        }
    }
}
