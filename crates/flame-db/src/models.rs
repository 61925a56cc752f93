/// Database row types — these map directly to SQLite rows.
/// Distinct from the flame-types API models to keep the DB layer
/// independent; timestamps are RFC 3339 TEXT.

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub kind: String,
    pub content: String,
    pub media_url: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub risk_score: i64,
    /// JSON array of flag strings.
    pub risk_flags: String,
    pub read: bool,
    pub created_at: String,
    pub read_at: Option<String>,
    pub deleted_at: Option<String>,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

pub struct PresenceRow {
    pub user_id: String,
    pub online: bool,
    pub last_active: String,
    pub hide_online: bool,
}
