use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            conversation_id     TEXT NOT NULL,
            sender_id           TEXT NOT NULL,
            receiver_id         TEXT NOT NULL,
            kind                TEXT NOT NULL,
            content             TEXT NOT NULL DEFAULT '',
            media_url           TEXT,
            reply_to_message_id TEXT,
            risk_score          INTEGER NOT NULL DEFAULT 0,
            risk_flags          TEXT NOT NULL DEFAULT '[]',
            read                INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            read_at             TEXT,
            deleted_at          TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(conversation_id, receiver_id, read);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        -- Directed block relations; a send is refused if a row exists in
        -- either direction between the two participants.
        CREATE TABLE IF NOT EXISTS blocks (
            blocker_id  TEXT NOT NULL,
            blocked_id  TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (blocker_id, blocked_id)
        );

        -- Per-user message counter against the subscription limit.
        -- message_limit < 0 means unlimited.
        CREATE TABLE IF NOT EXISTS quotas (
            user_id        TEXT PRIMARY KEY,
            used           INTEGER NOT NULL DEFAULT 0,
            message_limit  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS presence (
            user_id      TEXT PRIMARY KEY,
            online       INTEGER NOT NULL DEFAULT 0,
            last_active  TEXT NOT NULL,
            hide_online  INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
