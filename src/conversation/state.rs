//! Per-contact dialogue state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::intent::Intent;

/// Structured fields extracted from a message, keyed by field name.
pub type Entities = BTreeMap<String, Value>;

/// Dialogue state of one contact.
///
/// A pending confirmation always carries the intent and its entities, so
/// "awaiting confirmation without an intent" cannot be represented.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ConversationState {
    /// No pending confirmation.
    #[default]
    Idle,
    /// Waiting for the contact to answer yes or no.
    AwaitingConfirmation {
        /// The action to run on "yes".
        intent: Intent,
        /// Entities collected for it.
        entities: Entities,
    },
}

impl ConversationState {
    /// Whether no confirmation is pending.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Whether an entity value counts as present.
pub fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Required fields absent or empty in `entities`, in declaration order.
pub fn missing_fields(entities: &Entities, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|field| !entities.get(**field).is_some_and(is_filled))
        .map(|field| (*field).to_owned())
        .collect()
}

/// Render an entity value as display text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_owned(),
        other => other.to_string(),
    }
}
