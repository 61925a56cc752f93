//! End-to-end send flow against the real SQLite backend: two connected
//! users, the full gate pipeline, and room fan-out — no live transport,
//! per the injectable room index design.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use flame_db::{Database, SqliteBackend};
use flame_gateway::connection::{handle_command, publish_presence};
use flame_gateway::pipeline::GatewayDeps;
use flame_gateway::rooms::{RoomIndex, personal_room};
use flame_types::events::{ClientCommand, GatewayEvent};
use flame_types::message::{MessageKind, conversation_id};

struct World {
    backend: SqliteBackend,
    deps: GatewayDeps,
    rooms: RoomIndex,
    user_a: Uuid,
    user_b: Uuid,
    conn_a: Uuid,
    conn_b: Uuid,
    rx_a: UnboundedReceiver<GatewayEvent>,
    rx_b: UnboundedReceiver<GatewayEvent>,
    conversation: String,
}

/// Two users, both online, both joined to their personal room and the
/// shared conversation room.
async fn world() -> World {
    let backend = SqliteBackend::new(Arc::new(Database::open_in_memory().unwrap()));
    let deps = GatewayDeps {
        messages: Arc::new(backend.clone()),
        quota: Arc::new(backend.clone()),
        blocks: Arc::new(backend.clone()),
        presence: Arc::new(backend.clone()),
        quota_bypass: false,
    };

    let rooms = RoomIndex::new();
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
    let rx_a = rooms.register(conn_a).await;
    let rx_b = rooms.register(conn_b).await;

    let conversation = conversation_id(user_a, user_b);
    rooms.join(&personal_room(user_a), conn_a).await;
    rooms.join(&personal_room(user_b), conn_b).await;
    rooms.join(&conversation, conn_a).await;
    rooms.join(&conversation, conn_b).await;

    World {
        backend,
        deps,
        rooms,
        user_a,
        user_b,
        conn_a,
        conn_b,
        rx_a,
        rx_b,
        conversation,
    }
}

fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn send_text(receiver_id: Uuid, content: &str) -> ClientCommand {
    ClientCommand::MessageSend {
        receiver_id,
        content: content.to_string(),
        kind: MessageKind::Text,
        image_url: None,
        voice_url: None,
        reply_to_message_id: None,
    }
}

#[tokio::test]
async fn clean_message_fans_out_and_counts_quota() {
    let mut w = world().await;
    w.backend
        .db()
        .set_quota(&w.user_a.to_string(), 0, 5)
        .unwrap();

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        send_text(w.user_b, "Hello, call me at 0102030405"),
    )
    .await;

    // B is in their personal room and the conversation room, so the new
    // message arrives on both paths.
    let b_events = drain(&mut w.rx_b);
    let new_count = b_events
        .iter()
        .filter(|e| matches!(e, GatewayEvent::MessageNew(_)))
        .count();
    assert_eq!(new_count, 2);
    let GatewayEvent::MessageNew(message) = &b_events[0] else {
        panic!("expected message:new, got {:?}", b_events[0]);
    };
    assert_eq!(message.risk_score, 15);
    assert_eq!(message.risk_flags, vec!["phone_number"]);
    assert_eq!(message.conversation_id, w.conversation);
    assert!(!message.read);

    // A gets the conversation-room copy plus the sender ack carrying the
    // canonical persisted record.
    let a_events = drain(&mut w.rx_a);
    let sent = a_events
        .iter()
        .find_map(|e| match e {
            GatewayEvent::MessageSent(m) => Some(m),
            _ => None,
        })
        .expect("sender ack missing");
    assert_eq!(sent.id, message.id);
    assert_eq!(sent.created_at, message.created_at);

    let verdict = w.deps.quota.check_limit(w.user_a).await.unwrap();
    assert_eq!(verdict.remaining, 4);
}

#[tokio::test]
async fn scam_message_is_rejected_to_sender_only() {
    let mut w = world().await;

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        send_text(w.user_b, "Envoie 5000 FCFA via whatsapp +2250102030405"),
    )
    .await;

    let a_events = drain(&mut w.rx_a);
    assert_eq!(a_events.len(), 1);
    match &a_events[0] {
        GatewayEvent::MessageError {
            risk_score,
            risk_flags,
            ..
        } => {
            assert_eq!(*risk_score, Some(100));
            assert!(
                risk_flags
                    .as_ref()
                    .unwrap()
                    .iter()
                    .any(|f| f == "high_risk_combo")
            );
        }
        other => panic!("expected message:error, got {other:?}"),
    }

    // Nothing reached the receiver, nothing was counted.
    assert!(drain(&mut w.rx_b).is_empty());
    let verdict = w.deps.quota.check_limit(w.user_a).await.unwrap();
    assert_eq!(verdict.remaining, flame_db::sqlite::DEFAULT_FREE_LIMIT);
}

#[tokio::test]
async fn blocked_pair_gets_error_and_no_delivery() {
    let mut w = world().await;
    w.backend
        .db()
        .add_block(
            &w.user_b.to_string(),
            &w.user_a.to_string(),
            &Utc::now().to_rfc3339(),
        )
        .unwrap();

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        send_text(w.user_b, "hey"),
    )
    .await;

    let a_events = drain(&mut w.rx_a);
    assert!(matches!(&a_events[..], [GatewayEvent::MessageError { .. }]));
    assert!(drain(&mut w.rx_b).is_empty());
}

#[tokio::test]
async fn quota_exhaustion_reports_remaining() {
    let mut w = world().await;
    w.backend
        .db()
        .set_quota(&w.user_a.to_string(), 10, 10)
        .unwrap();

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        send_text(w.user_b, "hey"),
    )
    .await;

    let a_events = drain(&mut w.rx_a);
    match &a_events[..] {
        [GatewayEvent::MessageError { remaining, .. }] => {
            assert_eq!(*remaining, Some(0));
        }
        other => panic!("expected quota error, got {other:?}"),
    }
    assert!(drain(&mut w.rx_b).is_empty());
}

#[tokio::test]
async fn presence_broadcast_honors_visibility_preference() {
    let mut w = world().await;

    // A is visible: everyone connected hears the status change.
    publish_presence(&w.rooms, &w.deps, w.user_a, true).await;
    for rx in [&mut w.rx_a, &mut w.rx_b] {
        let events = drain(rx);
        match &events[..] {
            [GatewayEvent::UserOnline { user_id, .. }] => assert_eq!(*user_id, w.user_a),
            other => panic!("expected user:online, got {other:?}"),
        }
    }

    // B hides their online status: the record is still written but no
    // broadcast goes out, in either direction.
    w.backend
        .db()
        .set_presence_visibility(&w.user_b.to_string(), true)
        .unwrap();
    publish_presence(&w.rooms, &w.deps, w.user_b, true).await;
    publish_presence(&w.rooms, &w.deps, w.user_b, false).await;
    assert!(drain(&mut w.rx_a).is_empty());
    assert!(drain(&mut w.rx_b).is_empty());
}

#[tokio::test]
async fn reaction_toggle_broadcasts_updated_reactor_set() {
    let mut w = world().await;

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        send_text(w.user_b, "salut"),
    )
    .await;
    let b_events = drain(&mut w.rx_b);
    let GatewayEvent::MessageNew(message) = &b_events[0] else {
        panic!("expected message:new");
    };
    let message_id = message.id;
    drain(&mut w.rx_a);

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_b,
        w.user_b,
        ClientCommand::MessageReaction {
            message_id,
            emoji: "❤️".into(),
        },
    )
    .await;

    // Both participants sit in the conversation room.
    for rx in [&mut w.rx_a, &mut w.rx_b] {
        let events = drain(rx);
        match &events[..] {
            [GatewayEvent::MessageReaction(update)] => {
                assert_eq!(update.message_id, message_id);
                assert_eq!(update.reactors, vec![w.user_b]);
            }
            other => panic!("expected message:reaction, got {other:?}"),
        }
    }

    // Toggling again returns the reactor set to empty.
    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_b,
        w.user_b,
        ClientCommand::MessageReaction {
            message_id,
            emoji: "❤️".into(),
        },
    )
    .await;
    let events = drain(&mut w.rx_a);
    match &events[..] {
        [GatewayEvent::MessageReaction(update)] => assert!(update.reactors.is_empty()),
        other => panic!("expected message:reaction, got {other:?}"),
    }
}

#[tokio::test]
async fn read_receipt_reaches_the_conversation_room() {
    let mut w = world().await;

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        send_text(w.user_b, "lu ?"),
    )
    .await;
    drain(&mut w.rx_a);
    drain(&mut w.rx_b);

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_b,
        w.user_b,
        ClientCommand::MessageRead {
            conversation_id: w.conversation.clone(),
        },
    )
    .await;

    let events = drain(&mut w.rx_a);
    match &events[..] {
        [GatewayEvent::MessageRead {
            conversation_id,
            user_id,
        }] => {
            assert_eq!(conversation_id, &w.conversation);
            assert_eq!(*user_id, w.user_b);
        }
        other => panic!("expected message:read, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_broadcasts_and_rejects_foreign_messages() {
    let mut w = world().await;

    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        send_text(w.user_b, "oups"),
    )
    .await;
    let b_events = drain(&mut w.rx_b);
    let GatewayEvent::MessageNew(message) = &b_events[0] else {
        panic!("expected message:new");
    };
    let message_id = message.id;
    drain(&mut w.rx_a);

    // B cannot delete A's message.
    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_b,
        w.user_b,
        ClientCommand::MessageDelete { message_id },
    )
    .await;
    let events = drain(&mut w.rx_b);
    assert!(matches!(&events[..], [GatewayEvent::MessageError { .. }]));

    // A can; the whole conversation room hears about it.
    handle_command(
        &w.rooms,
        &w.deps,
        w.conn_a,
        w.user_a,
        ClientCommand::MessageDelete { message_id },
    )
    .await;
    let events = drain(&mut w.rx_b);
    match &events[..] {
        [GatewayEvent::MessageDeleted {
            message_id: deleted,
            ..
        }] => assert_eq!(*deleted, message_id),
        other => panic!("expected message:deleted, got {other:?}"),
    }
}
