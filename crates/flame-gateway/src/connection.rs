use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use flame_types::auth::Claims;
use flame_types::error::AuthError;
use flame_types::events::{ClientCommand, GatewayEvent};

use crate::pipeline::{self, GatewayDeps, SendRequest};
use crate::rooms::{RoomIndex, personal_room};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection gets to present its bearer credential.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection end to end: identify handshake,
/// presence, room membership, event dispatch, disconnect cleanup.
pub async fn handle_connection(
    socket: WebSocket,
    rooms: RoomIndex,
    deps: Arc<GatewayDeps>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Nothing is processed until the handshake succeeds; both failure
    // reasons reject the connection before it reaches the event loop.
    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Ok(user_id) => user_id,
        Err(reason) => {
            warn!("WebSocket handshake rejected: {reason}");
            return;
        }
    };

    info!("{user_id} connected to gateway");

    let conn_id = Uuid::new_v4();
    let mut event_rx = rooms.register(conn_id).await;
    rooms.join(&personal_room(user_id), conn_id).await;

    publish_presence(&rooms, &deps, user_id, true).await;

    let ready = GatewayEvent::Ready { user_id };
    if send_event(&mut sender, &ready).await.is_err() {
        rooms.unregister(conn_id).await;
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted/room events -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {missed_heartbeats} pongs), dropping connection");
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client. Each command is awaited to
    // completion before the next is read: events from one connection are
    // handled strictly in arrival order, while other connections'
    // handlers run concurrently on their own tasks.
    let rooms_recv = rooms.clone();
    let deps_recv = deps.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&rooms_recv, &deps_recv, conn_id, user_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{user_id} bad command: {e} -- raw: {}",
                            truncate_for_log(&text, 200)
                        );
                        rooms_recv
                            .send_to_conn(conn_id, GatewayEvent::MessageError {
                                message: "Malformed event payload".into(),
                                risk_score: None,
                                risk_flags: None,
                                remaining: None,
                            })
                            .await;
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    rooms.unregister(conn_id).await;
    publish_presence(&rooms, &deps, user_id, false).await;

    info!("{user_id} disconnected from gateway");
}

/// Record a presence change and broadcast it, unless the user hides
/// their online status. Presence is a can-fail collaborator: a tracker
/// outage skips the broadcast but never takes the connection down.
pub async fn publish_presence(
    rooms: &RoomIndex,
    deps: &GatewayDeps,
    user_id: Uuid,
    online: bool,
) {
    match deps.presence.set_online(user_id, online).await {
        Ok(record) if !record.hide_online => {
            let event = if online {
                GatewayEvent::UserOnline {
                    user_id,
                    last_active: record.last_active,
                }
            } else {
                GatewayEvent::UserOffline {
                    user_id,
                    last_active: record.last_active,
                }
            };
            rooms.broadcast_all(&event).await;
        }
        Ok(_) => debug!("{user_id} presence change is hidden"),
        Err(e) => warn!("presence update failed for {user_id}: {e}"),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    sender.send(WsMessage::Text(text.into())).await
}

/// Wait for the Identify command carrying the bearer token. A missing
/// credential (timeout, stream end, or a non-identify first frame) and
/// an invalid/expired token are distinct reasons; both reject.
async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Result<Uuid, AuthError> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let handshake = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Text(text) = msg {
                return match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(ClientCommand::Identify { token }) => Some(token),
                    _ => None,
                };
            }
        }
        None
    });

    let token = match handshake.await {
        Ok(Some(token)) => token,
        // Timed out, stream closed, or the first frame was not an
        // identify: no credential was presented.
        _ => return Err(AuthError::MissingCredential),
    };

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidCredential)?;

    Ok(token_data.claims.sub)
}

/// Truncate a raw payload for logging without slicing inside a
/// multi-byte character.
fn truncate_for_log(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Dispatch one authenticated client command. Every failure is caught
/// here and converted into an error event for this connection only.
pub async fn handle_command(
    rooms: &RoomIndex,
    deps: &GatewayDeps,
    conn_id: Uuid,
    user_id: Uuid,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::Identify { .. } => {} // Already handled

        ClientCommand::ConversationJoin { conversation_id } => {
            debug!("{user_id} joins {conversation_id}");
            rooms.join(&conversation_id, conn_id).await;
        }

        ClientCommand::ConversationLeave { conversation_id } => {
            debug!("{user_id} leaves {conversation_id}");
            rooms.leave(&conversation_id, conn_id).await;
        }

        ClientCommand::MessageSend {
            receiver_id,
            content,
            kind,
            image_url,
            voice_url,
            reply_to_message_id,
        } => {
            let req = SendRequest {
                receiver_id,
                content,
                kind,
                image_url,
                voice_url,
                reply_to_message_id,
            };
            match pipeline::handle_send(deps, user_id, req).await {
                Ok(message) => {
                    // Receiver's personal room first (direct delivery),
                    // then the conversation room, then the sender ack
                    // with the canonical persisted record.
                    rooms
                        .send_to_room(
                            &personal_room(message.receiver_id),
                            &GatewayEvent::MessageNew(message.clone()),
                        )
                        .await;
                    rooms
                        .send_to_room(
                            &message.conversation_id,
                            &GatewayEvent::MessageNew(message.clone()),
                        )
                        .await;
                    rooms
                        .send_to_conn(conn_id, GatewayEvent::MessageSent(message))
                        .await;
                }
                Err(err) => {
                    info!("{user_id} send refused: {err}");
                    rooms.send_to_conn(conn_id, pipeline::error_event(&err)).await;
                }
            }
        }

        ClientCommand::MessageReaction { message_id, emoji } => {
            match deps.messages.toggle_reaction(message_id, user_id, &emoji).await {
                Ok(Some(update)) => {
                    let room = update.conversation_id.clone();
                    rooms
                        .send_to_room(&room, &GatewayEvent::MessageReaction(update))
                        .await;
                }
                Ok(None) => debug!("{user_id} reacted to unknown message {message_id}"),
                Err(e) => {
                    warn!("reaction toggle failed for {user_id}: {e}");
                    rooms
                        .send_to_conn(conn_id, GatewayEvent::MessageError {
                            message: "Failed to update reaction".into(),
                            risk_score: None,
                            risk_flags: None,
                            remaining: None,
                        })
                        .await;
                }
            }
        }

        ClientCommand::MessageRead { conversation_id } => {
            match deps.messages.mark_as_read(&conversation_id, user_id).await {
                Ok(()) => {
                    let event = GatewayEvent::MessageRead {
                        conversation_id: conversation_id.clone(),
                        user_id,
                    };
                    rooms.send_to_room(&conversation_id, &event).await;
                }
                Err(e) => {
                    warn!("mark-as-read failed for {user_id}: {e}");
                    rooms
                        .send_to_conn(conn_id, GatewayEvent::MessageError {
                            message: "Failed to mark conversation as read".into(),
                            risk_score: None,
                            risk_flags: None,
                            remaining: None,
                        })
                        .await;
                }
            }
        }

        ClientCommand::MessageTyping { conversation_id } => {
            let event = GatewayEvent::MessageTyping {
                conversation_id: conversation_id.clone(),
                user_id,
            };
            rooms.send_to_room(&conversation_id, &event).await;
        }

        ClientCommand::MessageDelete { message_id } => {
            match deps.messages.soft_delete(message_id, user_id).await {
                Ok(Some(message)) => {
                    rooms
                        .send_to_room(&message.conversation_id, &GatewayEvent::MessageDeleted {
                            conversation_id: message.conversation_id.clone(),
                            message_id: message.id,
                        })
                        .await;
                }
                Ok(None) => {
                    rooms
                        .send_to_conn(conn_id, GatewayEvent::MessageError {
                            message: "Message not found".into(),
                            risk_score: None,
                            risk_flags: None,
                            remaining: None,
                        })
                        .await;
                }
                Err(e) => {
                    warn!("soft delete failed for {user_id}: {e}");
                    rooms
                        .send_to_conn(conn_id, GatewayEvent::MessageError {
                            message: "Failed to delete message".into(),
                            risk_score: None,
                            risk_flags: None,
                            remaining: None,
                        })
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_truncation_respects_char_boundaries() {
        // 199 ASCII bytes plus a two-byte character: byte 200 falls
        // inside the final char, so a plain byte slice would panic and
        // take the whole recv loop down with it.
        let payload = format!("{}é", "a".repeat(199));
        assert_eq!(payload.len(), 201);
        assert!(serde_json::from_str::<ClientCommand>(&payload).is_err());

        let truncated = truncate_for_log(&payload, 200);
        assert_eq!(truncated.len(), 199);
        assert!(truncated.chars().all(|c| c == 'a'));
    }

    #[test]
    fn log_truncation_keeps_short_payloads_whole() {
        assert_eq!(truncate_for_log("not json", 200), "not json");
        assert_eq!(truncate_for_log("héllo", 2), "h");
        assert_eq!(truncate_for_log("héllo", 3), "hé");
    }
}
