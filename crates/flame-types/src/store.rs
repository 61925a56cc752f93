use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::{Message, NewMessage, PresenceRecord, QuotaVerdict, ReactionUpdate};

/// Message persistence. Every call may suspend on I/O; the gateway
/// treats the store as a can-fail external collaborator.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message. Computes the conversation id from the sorted
    /// participant pair and attaches the supplied risk metadata.
    async fn create(&self, new: NewMessage) -> Result<Message, StoreError>;

    /// Toggle `user_id`'s reaction with `emoji`: remove if present, add
    /// if not. Returns `None` when the message does not exist.
    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<Option<ReactionUpdate>, StoreError>;

    /// Mark every unread message in the conversation addressed to
    /// `user_id` as read. Idempotent: already-read messages keep their
    /// original read timestamp.
    async fn mark_as_read(&self, conversation_id: &str, user_id: Uuid) -> Result<(), StoreError>;

    /// Soft-delete a message owned by `sender_id`: clear content and
    /// media URL, set the deletion timestamp, keep the row. Returns the
    /// updated record, or `None` if the message does not exist or is not
    /// owned by `sender_id`.
    async fn soft_delete(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Option<Message>, StoreError>;
}

/// Message allowance checks against the user's subscription record.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check_limit(&self, user_id: Uuid) -> Result<QuotaVerdict, StoreError>;

    /// Count one sent message. Called only after the message is durably
    /// persisted; last-write-wins increment-by-one.
    async fn increment(&self, user_id: Uuid) -> Result<(), StoreError>;
}

/// Block relations between users.
#[async_trait]
pub trait BlockRegistry: Send + Sync {
    /// True if `a` blocked `b` or `b` blocked `a`. Symmetric.
    async fn is_blocked_either_way(&self, a: Uuid, b: Uuid) -> Result<bool, StoreError>;
}

/// Online/offline state plus the user's visibility preference.
#[async_trait]
pub trait PresenceTracker: Send + Sync {
    /// Update the online flag and last-active timestamp, returning the
    /// record so the caller can honor `hide_online` before broadcasting.
    async fn set_online(&self, user_id: Uuid, online: bool) -> Result<PresenceRecord, StoreError>;
}
