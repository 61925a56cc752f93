use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Message content type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
}

/// Canonical persisted message record. This is what the store hands back
/// on create and what goes over the wire in `message:new` / `message:sent`.
///
/// Messages are never physically deleted — a soft delete clears `content`
/// and `media_url` and sets `deleted_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub media_url: Option<String>,
    pub reply_to_message_id: Option<Uuid>,
    /// 0..=100, assigned by the content classifier at send time.
    pub risk_score: u8,
    pub risk_flags: Vec<String>,
    /// emoji -> ids of users who reacted with it.
    pub reactions: HashMap<String, Vec<Uuid>>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input to `MessageStore::create`, assembled by the send pipeline after
/// the content classifier has run.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub content: String,
    pub image_url: Option<String>,
    pub voice_url: Option<String>,
    pub reply_to_message_id: Option<Uuid>,
    pub risk_score: u8,
    pub risk_flags: Vec<String>,
}

impl NewMessage {
    /// Type-specific requirements: audio messages must carry a voice URL.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.kind == MessageKind::Audio && self.voice_url.is_none() {
            return Err(StoreError::Validation(
                "audio message requires a voice URL".into(),
            ));
        }
        Ok(())
    }

    /// The single media URL stored on the message, by kind.
    pub fn media_url(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => None,
            MessageKind::Image | MessageKind::Video => self.image_url.as_deref(),
            MessageKind::Audio => self.voice_url.as_deref(),
        }
    }
}

/// Result of toggling a reaction: the full reactor set for that emoji
/// after the toggle, ready to broadcast to the conversation room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub conversation_id: String,
    pub message_id: Uuid,
    pub emoji: String,
    pub reactors: Vec<Uuid>,
}

/// Per-user presence state, returned by `PresenceTracker::set_online` so
/// the gateway can honor `hide_online` before broadcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub online: bool,
    pub last_active: DateTime<Utc>,
    pub hide_online: bool,
}

/// Result of a quota check. `remaining` is `i64::MAX` for unlimited
/// subscriptions.
#[derive(Debug, Clone, Copy)]
pub struct QuotaVerdict {
    pub can_send: bool,
    pub remaining: i64,
}

/// Deterministic conversation id: the two participant ids in canonical
/// lowercase-hyphenated form, sorted lexicographically, joined with `_`.
/// Symmetric by construction, and reproduced by clients — do not change
/// the separator.
pub fn conversation_id(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(conversation_id(a, b), conversation_id(b, a));
        assert_ne!(conversation_id(a, b), conversation_id(a, a));
    }

    #[test]
    fn conversation_id_sorts_lexicographically() {
        let a: Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        let b: Uuid = "00000000-0000-0000-0000-000000000002".parse().unwrap();
        assert_eq!(
            conversation_id(b, a),
            format!("{a}_{b}"),
        );
    }

    #[test]
    fn audio_without_voice_url_fails_validation() {
        let msg = NewMessage {
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            kind: MessageKind::Audio,
            content: String::new(),
            image_url: None,
            voice_url: None,
            reply_to_message_id: None,
            risk_score: 0,
            risk_flags: vec![],
        };
        assert!(msg.validate().is_err());
    }
}
