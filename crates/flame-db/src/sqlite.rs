use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use flame_types::error::StoreError;
use flame_types::message::{
    Message, MessageKind, NewMessage, PresenceRecord, QuotaVerdict, ReactionUpdate,
    conversation_id,
};
use flame_types::store::{BlockRegistry, MessageStore, PresenceTracker, QuotaGate};

use crate::Database;
use crate::models::MessageRow;

/// Message allowance for users without a subscription row (free tier).
pub const DEFAULT_FREE_LIMIT: i64 = 10;

/// SQLite-backed implementation of all four gateway collaborators.
/// Queries are synchronous behind a connection mutex, so every trait
/// method hops to the blocking pool.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Database>,
}

impl SqliteBackend {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The underlying database handle, for seed and maintenance paths
    /// that sit outside the collaborator traits.
    pub fn db(&self) -> &Database {
        &self.db
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Persistence(format!("blocking task failed: {e}")))?
            .map_err(|e| StoreError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl MessageStore for SqliteBackend {
    async fn create(&self, new: NewMessage) -> Result<Message, StoreError> {
        new.validate()?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation_id(new.sender_id, new.receiver_id),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            kind: new.kind,
            content: new.content.clone(),
            media_url: new.media_url().map(str::to_string),
            reply_to_message_id: new.reply_to_message_id,
            risk_score: new.risk_score,
            risk_flags: new.risk_flags.clone(),
            reactions: HashMap::new(),
            read: false,
            created_at: Utc::now(),
            read_at: None,
            deleted_at: None,
        };

        let row = MessageRow {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.to_string(),
            receiver_id: message.receiver_id.to_string(),
            kind: kind_to_str(message.kind).to_string(),
            content: message.content.clone(),
            media_url: message.media_url.clone(),
            reply_to_message_id: message.reply_to_message_id.map(|id| id.to_string()),
            risk_score: message.risk_score as i64,
            risk_flags: serde_json::to_string(&message.risk_flags)
                .map_err(|e| StoreError::Persistence(e.to_string()))?,
            read: false,
            created_at: message.created_at.to_rfc3339(),
            read_at: None,
            deleted_at: None,
        };

        self.run(move |db| db.insert_message(&row)).await?;
        Ok(message)
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<Option<ReactionUpdate>, StoreError> {
        let reaction_id = Uuid::new_v4().to_string();
        let mid = message_id.to_string();
        let uid = user_id.to_string();
        let emoji_owned = emoji.to_string();
        let now = Utc::now().to_rfc3339();

        let result = self
            .run(move |db| db.toggle_reaction(&reaction_id, &mid, &uid, &emoji_owned, &now))
            .await?;

        let Some((conversation_id, reactors)) = result else {
            return Ok(None);
        };

        let reactors = reactors
            .iter()
            .map(|id| id.parse::<Uuid>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Persistence(format!("corrupt reactor id: {e}")))?;

        Ok(Some(ReactionUpdate {
            conversation_id,
            message_id,
            emoji: emoji.to_string(),
            reactors,
        }))
    }

    async fn mark_as_read(&self, conversation_id: &str, user_id: Uuid) -> Result<(), StoreError> {
        let cid = conversation_id.to_string();
        let uid = user_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.run(move |db| db.mark_conversation_read(&cid, &uid, &now))
            .await?;
        Ok(())
    }

    async fn soft_delete(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Option<Message>, StoreError> {
        let mid = message_id.to_string();
        let sid = sender_id.to_string();
        let now = Utc::now().to_rfc3339();

        let result = self
            .run(move |db| {
                let Some(row) = db.soft_delete_message(&mid, &sid, &now)? else {
                    return Ok(None);
                };
                let reactions = db.reactions_for_message(&mid)?;
                Ok(Some((row, reactions)))
            })
            .await?;

        match result {
            None => Ok(None),
            Some((row, reactions)) => {
                let mut reaction_map: HashMap<String, Vec<Uuid>> = HashMap::new();
                for r in reactions {
                    if let Ok(uid) = r.user_id.parse::<Uuid>() {
                        reaction_map.entry(r.emoji).or_default().push(uid);
                    }
                }
                row_to_message(row, reaction_map).map(Some)
            }
        }
    }
}

#[async_trait]
impl QuotaGate for SqliteBackend {
    async fn check_limit(&self, user_id: Uuid) -> Result<QuotaVerdict, StoreError> {
        let uid = user_id.to_string();
        let quota = self.run(move |db| db.quota_for(&uid)).await?;

        let (used, limit) = quota.unwrap_or((0, DEFAULT_FREE_LIMIT));
        let remaining = if limit < 0 {
            i64::MAX
        } else {
            (limit - used).max(0)
        };

        Ok(QuotaVerdict {
            can_send: remaining > 0,
            remaining,
        })
    }

    async fn increment(&self, user_id: Uuid) -> Result<(), StoreError> {
        let uid = user_id.to_string();
        self.run(move |db| db.increment_quota(&uid, DEFAULT_FREE_LIMIT))
            .await
    }
}

#[async_trait]
impl BlockRegistry for SqliteBackend {
    async fn is_blocked_either_way(&self, a: Uuid, b: Uuid) -> Result<bool, StoreError> {
        let (a, b) = (a.to_string(), b.to_string());
        self.run(move |db| db.is_blocked_either_way(&a, &b)).await
    }
}

#[async_trait]
impl PresenceTracker for SqliteBackend {
    async fn set_online(&self, user_id: Uuid, online: bool) -> Result<PresenceRecord, StoreError> {
        let uid = user_id.to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let row = self
            .run(move |db| db.upsert_presence(&uid, online, &now_str))
            .await?;

        Ok(PresenceRecord {
            user_id,
            online: row.online,
            last_active: parse_ts(&row.last_active)?,
            hide_online: row.hide_online,
        })
    }
}

fn kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::Audio => "audio",
        MessageKind::Video => "video",
    }
}

fn kind_from_str(s: &str) -> Result<MessageKind, StoreError> {
    match s {
        "text" => Ok(MessageKind::Text),
        "image" => Ok(MessageKind::Image),
        "audio" => Ok(MessageKind::Audio),
        "video" => Ok(MessageKind::Video),
        other => Err(StoreError::Persistence(format!(
            "unknown message kind '{other}'"
        ))),
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Persistence(format!("corrupt timestamp '{s}': {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Persistence(format!("corrupt id '{s}': {e}")))
}

fn row_to_message(
    row: MessageRow,
    reactions: HashMap<String, Vec<Uuid>>,
) -> Result<Message, StoreError> {
    Ok(Message {
        id: parse_uuid(&row.id)?,
        conversation_id: row.conversation_id,
        sender_id: parse_uuid(&row.sender_id)?,
        receiver_id: parse_uuid(&row.receiver_id)?,
        kind: kind_from_str(&row.kind)?,
        content: row.content,
        media_url: row.media_url,
        reply_to_message_id: row.reply_to_message_id.as_deref().map(parse_uuid).transpose()?,
        risk_score: row.risk_score.clamp(0, 100) as u8,
        risk_flags: serde_json::from_str(&row.risk_flags)
            .map_err(|e| StoreError::Persistence(format!("corrupt risk flags: {e}")))?,
        reactions,
        read: row.read,
        created_at: parse_ts(&row.created_at)?,
        read_at: row.read_at.as_deref().map(parse_ts).transpose()?,
        deleted_at: row.deleted_at.as_deref().map(parse_ts).transpose()?,
    })
}
