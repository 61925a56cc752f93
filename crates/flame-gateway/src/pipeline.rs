use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use flame_risk::{RiskAction, RiskReport, analyze};
use flame_types::error::SendError;
use flame_types::events::GatewayEvent;
use flame_types::message::{Message, MessageKind, NewMessage};
use flame_types::store::{BlockRegistry, MessageStore, PresenceTracker, QuotaGate};

/// Collaborator handles injected into the gateway. Shared state is
/// reached through these, never through globals, so the pipeline is
/// testable with spies.
#[derive(Clone)]
pub struct GatewayDeps {
    pub messages: Arc<dyn MessageStore>,
    pub quota: Arc<dyn QuotaGate>,
    pub blocks: Arc<dyn BlockRegistry>,
    pub presence: Arc<dyn PresenceTracker>,

    /// Explicit configuration switch for non-production environments:
    /// skips the quota check and the post-persist increment. Block and
    /// content-risk gating always run.
    pub quota_bypass: bool,
}

/// Inputs of a `message:send` event, after payload decoding.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub image_url: Option<String>,
    pub voice_url: Option<String>,
    pub reply_to_message_id: Option<Uuid>,
}

/// The message-send pipeline. Gate order is a contract (stable error
/// precedence): quota, then block, then payload validation, then
/// content analysis. Only then is the message persisted, the quota
/// counted, and the record handed back for fan-out.
pub async fn handle_send(
    deps: &GatewayDeps,
    sender_id: Uuid,
    req: SendRequest,
) -> Result<Message, SendError> {
    if !deps.quota_bypass {
        let verdict = deps.quota.check_limit(sender_id).await?;
        if !verdict.can_send {
            return Err(SendError::QuotaExceeded {
                remaining: verdict.remaining,
            });
        }
    }

    if deps
        .blocks
        .is_blocked_either_way(sender_id, req.receiver_id)
        .await?
    {
        return Err(SendError::Blocked);
    }

    let mut new = NewMessage {
        sender_id,
        receiver_id: req.receiver_id,
        kind: req.kind,
        content: req.content,
        image_url: req.image_url,
        voice_url: req.voice_url,
        reply_to_message_id: req.reply_to_message_id,
        risk_score: 0,
        risk_flags: Vec::new(),
    };
    new.validate()?;

    // Text is always analyzed; images only when they carry a caption.
    // Other media has no text to score and defaults to allow.
    let report = match new.kind {
        MessageKind::Text => analyze(&new.content),
        MessageKind::Image if !new.content.trim().is_empty() => analyze(&new.content),
        _ => RiskReport::allow(),
    };

    if report.action == RiskAction::Block {
        return Err(SendError::ContentBlocked {
            risk_score: report.risk_score,
            risk_flags: report.risk_flags,
        });
    }

    new.risk_score = report.risk_score;
    new.risk_flags = report.risk_flags;

    let message = deps.messages.create(new).await?;

    // The message is durable at this point; a failed count must not
    // unsend it. Reported, not fatal.
    if !deps.quota_bypass {
        if let Err(e) = deps.quota.increment(sender_id).await {
            warn!("quota increment failed for {sender_id}: {e}");
        }
    }

    Ok(message)
}

/// Convert a pipeline failure into the `message:error` event delivered
/// to the originating connection. Persistence details stay in the logs.
pub fn error_event(err: &SendError) -> GatewayEvent {
    let (message, risk_score, risk_flags, remaining) = match err {
        SendError::QuotaExceeded { remaining } => (
            "Message quota exceeded".to_string(),
            None,
            None,
            Some(*remaining),
        ),
        SendError::Blocked => ("You cannot message this user".to_string(), None, None, None),
        SendError::Validation(msg) => (msg.clone(), None, None, None),
        SendError::ContentBlocked {
            risk_score,
            risk_flags,
        } => (
            "Message blocked by content analysis".to_string(),
            Some(*risk_score),
            Some(risk_flags.clone()),
            None,
        ),
        SendError::Persistence(_) => ("Failed to send message".to_string(), None, None, None),
    };

    GatewayEvent::MessageError {
        message,
        risk_score,
        risk_flags,
        remaining,
    }
}
