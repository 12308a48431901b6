//! Phone-to-account links used by the authorization gate.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::phone;
use super::{AccountDirectory, StoreError};

/// Identifier of a business account in the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// [`AccountDirectory`] over the `linked_phones` table.
#[derive(Debug, Clone)]
pub struct SqliteAccountDirectory {
    db: SqlitePool,
}

impl SqliteAccountDirectory {
    /// Create a directory over an open pool (schema already applied).
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Link a phone number to an account, replacing any previous link.
    ///
    /// Returns the canonical phone form that was stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPhone`] for numbers with too few digits,
    /// or [`StoreError::Database`] on SQLite failure.
    pub async fn link_phone(&self, raw_phone: &str, account: &AccountId) -> Result<String, StoreError> {
        let canonical =
            phone::normalize(raw_phone).ok_or_else(|| StoreError::InvalidPhone(raw_phone.to_owned()))?;
        sqlx::query(
            "INSERT INTO linked_phones (phone, account_id, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(phone) DO UPDATE SET account_id = excluded.account_id",
        )
        .bind(&canonical)
        .bind(account.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        info!(phone = %canonical, account_id = %account, "phone linked");
        Ok(canonical)
    }

    /// Remove a phone link. Returns whether a link existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on invalid input or SQLite failure.
    pub async fn unlink_phone(&self, raw_phone: &str) -> Result<bool, StoreError> {
        let canonical =
            phone::normalize(raw_phone).ok_or_else(|| StoreError::InvalidPhone(raw_phone.to_owned()))?;
        let result = sqlx::query("DELETE FROM linked_phones WHERE phone = ?1")
            .bind(&canonical)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AccountDirectory for SqliteAccountDirectory {
    async fn resolve_account(&self, sender_id: &str) -> Result<Option<AccountId>, StoreError> {
        for candidate in phone::lookup_candidates(sender_id) {
            if candidate.is_empty() {
                continue;
            }
            let row: Option<(String,)> =
                sqlx::query_as("SELECT account_id FROM linked_phones WHERE phone = ?1")
                    .bind(&candidate)
                    .fetch_optional(&self.db)
                    .await?;
            if let Some((account_id,)) = row {
                debug!(sender_id, phone = %candidate, "sender resolved to account");
                return Ok(Some(AccountId(account_id)));
            }
        }
        Ok(None)
    }
}
