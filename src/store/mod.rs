//! SQLite persistence: conversation state, message log, and account links.
//!
//! All tables live in one database opened through [`Database`]. Writes go
//! straight through the pool; every write is a single small statement, so
//! no writer actor is needed.

pub mod accounts;
pub mod phone;
pub mod sessions;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::conversation::state::ConversationState;

pub use self::accounts::{AccountId, SqliteAccountDirectory};
pub use self::sessions::SqliteSessionStore;

/// Maximum pooled connections for a file-backed database.
const MAX_CONNECTIONS: u32 = 5;

/// Errors from the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A phone number has too few digits to be linked.
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// A stored enum column held an unknown value.
    #[error("invalid {field}: {value}")]
    InvalidEnum {
        /// Column name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS conversation_state (
        sender_id  TEXT PRIMARY KEY,
        state_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS message_log (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id  TEXT NOT NULL,
        direction  TEXT NOT NULL,
        text       TEXT NOT NULL,
        intent     TEXT,
        status     TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_message_log_sender ON message_log(sender_id)",
    "CREATE TABLE IF NOT EXISTS linked_phones (
        phone      TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS business_records (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id   TEXT NOT NULL,
        kind         TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        created_by   TEXT NOT NULL,
        created_at   TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_business_records_account ON business_records(account_id, kind)",
];

/// Handle to the zapdesk database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened or the
    /// schema cannot be applied.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.apply_schema().await?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Open a private in-memory database (tests, dry runs).
    ///
    /// Uses a single long-lived connection: every SQLite in-memory
    /// connection is its own database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the schema cannot be applied.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.apply_schema().await?;
        Ok(db)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn apply_schema(&self) -> Result<(), StoreError> {
        for sql in SCHEMA {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Message log
// ---------------------------------------------------------------------------

/// Direction of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the contact.
    Inbound,
    /// From the bot.
    Outbound,
}

impl Direction {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised direction.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(StoreError::InvalidEnum {
                field: "direction",
                value: other.to_owned(),
            }),
        }
    }
}

/// Outcome recorded for a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    /// Inbound message accepted for processing.
    Received,
    /// Reply handed to the dispatcher.
    Replied,
    /// The turn failed with an adapter error.
    Failed,
}

impl LogStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Replied => "replied",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "received" => Ok(Self::Received),
            "replied" => Ok(Self::Replied),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidEnum {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }
}

/// One row of the message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Contact address.
    pub sender_id: String,
    /// Inbound or outbound.
    pub direction: Direction,
    /// Message text, or the failure description for failed turns.
    pub text: String,
    /// Intent label, when known.
    pub intent: Option<String>,
    /// Outcome.
    pub status: LogStatus,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// An inbound message as received.
    pub fn inbound(sender_id: &str, text: &str) -> Self {
        Self::new(sender_id, Direction::Inbound, text, LogStatus::Received)
    }

    /// A reply sent to the contact.
    pub fn outbound(sender_id: &str, text: &str) -> Self {
        Self::new(sender_id, Direction::Outbound, text, LogStatus::Replied)
    }

    /// A turn that failed; `detail` describes the error.
    pub fn failed(sender_id: &str, detail: &str) -> Self {
        Self::new(sender_id, Direction::Inbound, detail, LogStatus::Failed)
    }

    /// Attach an intent label.
    #[must_use]
    pub fn with_intent(mut self, intent: &str) -> Self {
        self.intent = Some(intent.to_owned());
        self
    }

    fn new(sender_id: &str, direction: Direction, text: &str, status: LogStatus) -> Self {
        Self {
            sender_id: sender_id.to_owned(),
            direction,
            text: text.to_owned(),
            intent: None,
            status,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Per-contact dialogue state and message log.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the state for a contact. Unknown contacts get [`ConversationState::Idle`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    async fn get_state(&self, sender_id: &str) -> Result<ConversationState, StoreError>;

    /// Replace the state for a contact. Storing `Idle` clears it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    async fn set_state(&self, sender_id: &str, state: &ConversationState) -> Result<(), StoreError>;

    /// Append a message log entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError>;
}

/// Resolves which business account a contact is linked to.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Account linked to the sender's phone number, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup fails.
    async fn resolve_account(&self, sender_id: &str) -> Result<Option<AccountId>, StoreError>;
}
