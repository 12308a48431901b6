//! Credential state persistence.
//!
//! The transport needs its credential material on every (re)connect so that
//! an already-paired device does not have to scan a QR code again. The
//! material is opaque to us; we only load it, hand it over, and write back
//! whatever the transport reports as changed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::WhatsAppError;

/// Opaque credential material of one paired device.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    /// Identity and noise keys. `None` until the first pairing succeeds.
    #[serde(default)]
    pub creds: Option<Value>,
    /// Signal-protocol key store, keyed by the library's key ids.
    #[serde(default)]
    pub keys: BTreeMap<String, Value>,
}

impl AuthState {
    /// Whether a pairing has completed for this state.
    pub fn is_registered(&self) -> bool {
        self.creds.is_some()
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("creds", &self.creds.as_ref().map(|_| "__REDACTED__"))
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// Loads and saves [`AuthState`].
///
/// Both operations must be idempotent: saving the same state twice leaves
/// the store unchanged.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Load the stored state, or an empty state when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::AuthStore`] if the stored data is unreadable.
    async fn load(&self) -> Result<AuthState, WhatsAppError>;

    /// Persist the given state, replacing what was stored.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::AuthStore`] if the write fails.
    async fn save(&self, state: &AuthState) -> Result<(), WhatsAppError>;
}

/// JSON-file backed [`AuthStore`].
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write never leaves a truncated credential file.
#[derive(Debug, Clone)]
pub struct FileAuthStore {
    path: PathBuf,
}

impl FileAuthStore {
    /// Store credentials at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl AuthStore for FileAuthStore {
    async fn load(&self) -> Result<AuthState, WhatsAppError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored credentials");
                return Ok(AuthState::default());
            }
            Err(e) => {
                return Err(WhatsAppError::AuthStore(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_str(&contents).map_err(|e| {
            WhatsAppError::AuthStore(format!("corrupt credentials at {}: {e}", self.path.display()))
        })
    }

    async fn save(&self, state: &AuthState) -> Result<(), WhatsAppError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                WhatsAppError::AuthStore(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| WhatsAppError::AuthStore(format!("failed to encode credentials: {e}")))?;

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| WhatsAppError::AuthStore(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            WhatsAppError::AuthStore(format!("failed to replace {}: {e}", self.path.display()))
        })?;

        debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }
}
