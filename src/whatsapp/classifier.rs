//! Inbound event classification.
//!
//! Turns a raw [`InboundEvent`] batch into zero or more
//! [`ClassifiedMessage`]s, dropping echoes of our own messages, status and
//! broadcast traffic, group chats, and records without text. Pure: no I/O,
//! no state.

use tracing::trace;

use super::events::{BatchKind, InboundEvent, RawMessage};
use super::jid;
use crate::types::ClassifiedMessage;

/// Why a record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The batch is neither `notify` nor `append`.
    IgnoredBatch,
    /// Our own account sent the record.
    FromSelf,
    /// The record has no origin address.
    NoOrigin,
    /// Status chat or broadcast list.
    Broadcast,
    /// Group chat.
    Group,
    /// No text in any supported field (media, reactions, stubs).
    NoText,
}

/// Classify every record of a batch, preserving batch order.
pub fn classify(event: &InboundEvent) -> Vec<ClassifiedMessage> {
    event
        .messages
        .iter()
        .filter_map(|record| match classify_record(event.kind, record) {
            Ok(message) => Some(message),
            Err(reason) => {
                trace!(?reason, id = ?record.key.id, "dropped inbound record");
                None
            }
        })
        .collect()
}

/// Classify one record. Drop rules are checked in order and the first
/// match wins.
///
/// # Errors
///
/// Returns the [`DropReason`] of the first rule that matched.
pub fn classify_record(kind: BatchKind, record: &RawMessage) -> Result<ClassifiedMessage, DropReason> {
    if !matches!(kind, BatchKind::Notify | BatchKind::Append) {
        return Err(DropReason::IgnoredBatch);
    }
    if record.key.from_me {
        return Err(DropReason::FromSelf);
    }

    let origin = match record.key.remote_jid.as_deref() {
        Some(origin) if !origin.is_empty() => origin,
        _ => return Err(DropReason::NoOrigin),
    };
    if jid::is_broadcast(origin) {
        return Err(DropReason::Broadcast);
    }
    if jid::is_group(origin) {
        return Err(DropReason::Group);
    }

    let sender_id = resolve_sender(origin, record.key.participant.as_deref());
    let text = extract_text(record).ok_or(DropReason::NoText)?;

    Ok(ClassifiedMessage {
        sender_id,
        text,
        timestamp_seconds: record.message_timestamp.unwrap_or(0),
    })
}

/// Pick the canonical sender address.
///
/// Linked-device and newsletter identities hide the human author; when the
/// record carries a `participant`, that is who actually wrote it.
pub fn resolve_sender(origin: &str, participant: Option<&str>) -> String {
    if jid::is_indirect(origin) {
        if let Some(participant) = participant.filter(|p| !p.is_empty()) {
            return participant.to_owned();
        }
    }
    origin.to_owned()
}

/// First non-empty text among the supported content fields.
fn extract_text(record: &RawMessage) -> Option<String> {
    let content = record.message.as_ref()?;
    let candidates = [
        content.conversation.as_deref(),
        content
            .extended_text_message
            .as_ref()
            .and_then(|ext| ext.text.as_deref()),
    ];
    candidates
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
        .map(str::to_owned)
}
