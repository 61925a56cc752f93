use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, MessageKind, ReactionUpdate};

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Authenticate the connection with a bearer token. Must be the first
    /// command; nothing else is processed until it succeeds.
    #[serde(rename = "identify")]
    Identify { token: String },

    /// Join a conversation room. Idempotent.
    #[serde(rename = "conversation:join")]
    ConversationJoin { conversation_id: String },

    /// Leave a conversation room. Leaving a non-joined room is a no-op.
    #[serde(rename = "conversation:leave")]
    ConversationLeave { conversation_id: String },

    /// Send a message through the full pipeline (quota, block, content
    /// analysis, persistence, fan-out).
    #[serde(rename = "message:send")]
    MessageSend {
        receiver_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        #[serde(default)]
        image_url: Option<String>,
        #[serde(default)]
        voice_url: Option<String>,
        #[serde(default)]
        reply_to_message_id: Option<Uuid>,
    },

    /// Toggle a reaction on a message.
    #[serde(rename = "message:reaction")]
    MessageReaction { message_id: Uuid, emoji: String },

    /// Mark every unread message addressed to this user in the
    /// conversation as read.
    #[serde(rename = "message:read")]
    MessageRead { conversation_id: String },

    /// Typing indicator, relayed to the conversation room.
    #[serde(rename = "message:typing")]
    MessageTyping { conversation_id: String },

    /// Soft-delete one of the sender's own messages.
    #[serde(rename = "message:delete")]
    MessageDelete { message_id: Uuid },
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Handshake accepted; the connection is authenticated.
    #[serde(rename = "ready")]
    Ready { user_id: Uuid },

    /// A new message, delivered to the receiver's personal room and the
    /// conversation room.
    #[serde(rename = "message:new")]
    MessageNew(Message),

    /// Acknowledgment to the sender: the canonical persisted record,
    /// including the server-assigned id and timestamp.
    #[serde(rename = "message:sent")]
    MessageSent(Message),

    /// Any per-event failure, delivered only to the originating
    /// connection.
    #[serde(rename = "message:error")]
    MessageError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        risk_score: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        risk_flags: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining: Option<i64>,
    },

    /// Updated reactor set after a toggle, sent to the conversation room.
    #[serde(rename = "message:reaction")]
    MessageReaction(ReactionUpdate),

    /// Read receipt, sent to the conversation room.
    #[serde(rename = "message:read")]
    MessageRead {
        conversation_id: String,
        user_id: Uuid,
    },

    /// Typing indicator, sent to the conversation room.
    #[serde(rename = "message:typing")]
    MessageTyping {
        conversation_id: String,
        user_id: Uuid,
    },

    /// A message was soft-deleted by its sender.
    #[serde(rename = "message:deleted")]
    MessageDeleted {
        conversation_id: String,
        message_id: Uuid,
    },

    /// Presence broadcast, global, suppressed for users with
    /// `hide_online` set.
    #[serde(rename = "user:online")]
    UserOnline {
        user_id: Uuid,
        last_active: DateTime<Utc>,
    },

    #[serde(rename = "user:offline")]
    UserOffline {
        user_id: Uuid,
        last_active: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_wire_event_names() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"message:send","data":{"receiverId":"8c1f3f2e-46a4-4b07-b3f5-0e6a3f4f5a6b","content":"hey","type":"text"}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::MessageSend { kind, content, .. } => {
                assert_eq!(kind, MessageKind::Text);
                assert_eq!(content, "hey");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_wire_names() {
        let event = GatewayEvent::MessageRead {
            conversation_id: "a_b".into(),
            user_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message:read");
        assert_eq!(json["data"]["conversationId"], "a_b");
    }

    #[test]
    fn error_event_omits_absent_fields() {
        let event = GatewayEvent::MessageError {
            message: "blocked".into(),
            risk_score: None,
            risk_flags: None,
            remaining: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["data"].get("riskScore").is_none());
        assert!(json["data"].get("remaining").is_none());
    }
}
