//! SQLite-backed [`SessionStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::trace;

use super::{Direction, LogEntry, LogStatus, SessionStore, StoreError};
use crate::conversation::state::ConversationState;

/// Row type returned by message log queries.
type LogRow = (String, String, String, Option<String>, String, String);

/// Conversation state and message log in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db: SqlitePool,
}

impl SqliteSessionStore {
    /// Create a store over an open pool (schema already applied).
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Most recent log entries for a contact, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on SQLite failure or a corrupt row.
    pub async fn recent_log(&self, sender_id: &str, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT sender_id, direction, text, intent, status, created_at \
             FROM message_log WHERE sender_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(sender_id)
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(log_entry_from_row).collect()
    }
}

fn log_entry_from_row(row: LogRow) -> Result<LogEntry, StoreError> {
    let (sender_id, direction, text, intent, status, created_at) = row;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidEnum {
            field: "created_at",
            value: created_at.clone(),
        })?;
    Ok(LogEntry {
        sender_id,
        direction: Direction::parse(&direction)?,
        text,
        intent,
        status: LogStatus::parse(&status)?,
        created_at,
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_state(&self, sender_id: &str) -> Result<ConversationState, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM conversation_state WHERE sender_id = ?1")
                .bind(sender_id)
                .fetch_optional(&self.db)
                .await?;

        match row {
            Some((json,)) => Ok(serde_json::from_str(&json)?),
            None => Ok(ConversationState::Idle),
        }
    }

    async fn set_state(&self, sender_id: &str, state: &ConversationState) -> Result<(), StoreError> {
        if state.is_idle() {
            sqlx::query("DELETE FROM conversation_state WHERE sender_id = ?1")
                .bind(sender_id)
                .execute(&self.db)
                .await?;
            trace!(sender_id, "conversation state cleared");
            return Ok(());
        }

        let json = serde_json::to_string(state)?;
        sqlx::query(
            "INSERT INTO conversation_state (sender_id, state_json, updated_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(sender_id) DO UPDATE SET state_json = excluded.state_json, \
             updated_at = excluded.updated_at",
        )
        .bind(sender_id)
        .bind(&json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        trace!(sender_id, "conversation state saved");
        Ok(())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO message_log (sender_id, direction, text, intent, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&entry.sender_id)
        .bind(entry.direction.as_str())
        .bind(&entry.text)
        .bind(&entry.intent)
        .bind(entry.status.as_str())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
