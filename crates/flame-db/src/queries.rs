use anyhow::Result;
use rusqlite::Connection;

use crate::Database;
use crate::models::{MessageRow, PresenceRow, ReactionRow};

impl Database {
    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (
                    id, conversation_id, sender_id, receiver_id, kind, content,
                    media_url, reply_to_message_id, risk_score, risk_flags,
                    read, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    row.id,
                    row.conversation_id,
                    row.sender_id,
                    row.receiver_id,
                    row.kind,
                    row.content,
                    row.media_url,
                    row.reply_to_message_id,
                    row.risk_score,
                    row.risk_flags,
                    row.read,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Mark every unread message in the conversation addressed to
    /// `receiver_id` as read. The `read = 0` guard makes re-marking a
    /// no-op and preserves the original read timestamp.
    pub fn mark_conversation_read(
        &self,
        conversation_id: &str,
        receiver_id: &str,
        read_at: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read = 1, read_at = ?1
                 WHERE conversation_id = ?2 AND receiver_id = ?3 AND read = 0",
                rusqlite::params![read_at, conversation_id, receiver_id],
            )?;
            Ok(updated)
        })
    }

    /// Soft-delete: clear content and media, set deleted_at, keep the
    /// row. Only the sender may delete; returns the updated row, `None`
    /// if the message is missing or owned by someone else.
    pub fn soft_delete_message(
        &self,
        message_id: &str,
        sender_id: &str,
        deleted_at: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let Some(row) = query_message(conn, message_id)? else {
                return Ok(None);
            };
            if row.sender_id != sender_id {
                return Ok(None);
            }
            if row.deleted_at.is_some() {
                return Ok(Some(row));
            }

            conn.execute(
                "UPDATE messages SET content = '', media_url = NULL, deleted_at = ?1
                 WHERE id = ?2",
                rusqlite::params![deleted_at, message_id],
            )?;
            query_message(conn, message_id)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if present, inserts if not. Returns
    /// the message's conversation id plus the post-toggle reactor set
    /// for that emoji, or `None` if the message does not exist.
    pub fn toggle_reaction(
        &self,
        reaction_id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        created_at: &str,
    ) -> Result<Option<(String, Vec<String>)>> {
        self.with_conn(|conn| {
            let conversation_id: Option<String> = conn
                .query_row(
                    "SELECT conversation_id FROM messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(conversation_id) = conversation_id else {
                return Ok(None);
            };

            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![reaction_id, message_id, user_id, emoji, created_at],
                )?;
            }

            let mut stmt = conn.prepare(
                "SELECT user_id FROM reactions
                 WHERE message_id = ?1 AND emoji = ?2
                 ORDER BY created_at",
            )?;
            let reactors = stmt
                .query_map(rusqlite::params![message_id, emoji], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;

            Ok(Some((conversation_id, reactors)))
        })
    }

    pub fn reactions_for_message(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM reactions WHERE message_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([message_id], |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Blocks --

    pub fn is_blocked_either_way(&self, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let blocked: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM blocks
                    WHERE (blocker_id = ?1 AND blocked_id = ?2)
                       OR (blocker_id = ?2 AND blocked_id = ?1)
                 )",
                rusqlite::params![a, b],
                |row| row.get(0),
            )?;
            Ok(blocked)
        })
    }

    pub fn add_block(&self, blocker_id: &str, blocked_id: &str, created_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![blocker_id, blocked_id, created_at],
            )?;
            Ok(())
        })
    }

    // -- Quotas --

    /// (used, message_limit) for the user, if a subscription row exists.
    pub fn quota_for(&self, user_id: &str) -> Result<Option<(i64, i64)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT used, message_limit FROM quotas WHERE user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    /// Count one sent message. Increment-by-delta upsert so concurrent
    /// sends from several connections never lose counts.
    pub fn increment_quota(&self, user_id: &str, default_limit: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO quotas (user_id, used, message_limit) VALUES (?1, 1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET used = used + 1",
                rusqlite::params![user_id, default_limit],
            )?;
            Ok(())
        })
    }

    /// Replace a user's quota row. Used when a subscription period
    /// starts or changes (driven externally).
    pub fn set_quota(&self, user_id: &str, used: i64, message_limit: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO quotas (user_id, used, message_limit) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE
                 SET used = excluded.used, message_limit = excluded.message_limit",
                rusqlite::params![user_id, used, message_limit],
            )?;
            Ok(())
        })
    }

    // -- Presence --

    pub fn upsert_presence(
        &self,
        user_id: &str,
        online: bool,
        last_active: &str,
    ) -> Result<PresenceRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence (user_id, online, last_active) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE
                 SET online = excluded.online, last_active = excluded.last_active",
                rusqlite::params![user_id, online, last_active],
            )?;
            conn.query_row(
                "SELECT user_id, online, last_active, hide_online
                 FROM presence WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(PresenceRow {
                        user_id: row.get(0)?,
                        online: row.get(1)?,
                        last_active: row.get(2)?,
                        hide_online: row.get(3)?,
                    })
                },
            )
            .map_err(Into::into)
        })
    }

    /// Visibility preference, synced from the user's profile settings.
    pub fn set_presence_visibility(&self, user_id: &str, hide_online: bool) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence (user_id, online, last_active, hide_online)
                 VALUES (?1, 0, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET hide_online = excluded.hide_online",
                rusqlite::params![user_id, now, hide_online],
            )?;
            Ok(())
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, receiver_id, kind, content,
                media_url, reply_to_message_id, risk_score, risk_flags,
                read, created_at, read_at, deleted_at
         FROM messages WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                kind: row.get(4)?,
                content: row.get(5)?,
                media_url: row.get(6)?,
                reply_to_message_id: row.get(7)?,
                risk_score: row.get(8)?,
                risk_flags: row.get(9)?,
                read: row.get(10)?,
                created_at: row.get(11)?,
                read_at: row.get(12)?,
                deleted_at: row.get(13)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
