use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use flame_types::events::GatewayEvent;

/// The implicit per-user room, joined automatically on authentication.
/// Used for direct delivery regardless of which conversation rooms the
/// recipient currently has open.
pub fn personal_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

/// Explicit room-membership index: room id -> set of connection ids,
/// plus a targeted send channel per connection. Owned by the gateway,
/// injected into handlers, and unit-testable without a live transport.
#[derive(Clone, Default)]
pub struct RoomIndex {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Per-connection outbound channels: conn_id -> sender.
    conns: RwLock<HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>,

    /// Room membership: room id -> connection ids.
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel. Returns the receiver
    /// the connection loop drains into its WebSocket sink.
    pub async fn register(&self, conn_id: Uuid) -> mpsc::UnboundedReceiver<GatewayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.conns.write().await.insert(conn_id, tx);
        rx
    }

    /// Drop a connection: removes its channel and every room membership.
    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.conns.write().await.remove(&conn_id);

        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Idempotent: joining a room twice is a no-op.
    pub async fn join(&self, room: &str, conn_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Leaving a room the connection never joined is a no-op.
    pub async fn leave(&self, room: &str, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Deliver an event to every connection in the room. At-most-once
    /// per member: a closed channel is skipped, not retried.
    pub async fn send_to_room(&self, room: &str, event: &GatewayEvent) {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return;
        };
        let conns = self.inner.conns.read().await;
        for conn_id in members {
            if let Some(tx) = conns.get(conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Deliver an event to a single connection.
    pub async fn send_to_conn(&self, conn_id: Uuid, event: GatewayEvent) {
        let conns = self.inner.conns.read().await;
        if let Some(tx) = conns.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Deliver an event to every registered connection (presence).
    pub async fn broadcast_all(&self, event: &GatewayEvent) {
        let conns = self.inner.conns.read().await;
        for tx in conns.values() {
            let _ = tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_room_reaches_members_only() {
        let rooms = RoomIndex::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = rooms.register(a).await;
        let mut rx_b = rooms.register(b).await;
        let mut rx_c = rooms.register(c).await;

        rooms.join("conv", a).await;
        rooms.join("conv", b).await;

        let event = GatewayEvent::Ready {
            user_id: Uuid::nil(),
        };
        rooms.send_to_room("conv", &event).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let rooms = RoomIndex::new();
        let conn = Uuid::new_v4();
        let mut rx = rooms.register(conn).await;

        rooms.join("conv", conn).await;
        rooms.join("conv", conn).await;

        let event = GatewayEvent::Ready {
            user_id: Uuid::nil(),
        };
        rooms.send_to_room("conv", &event).await;

        assert!(rx.try_recv().is_ok());
        // A double join must not produce a double delivery.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_unjoined_room_is_noop() {
        let rooms = RoomIndex::new();
        let conn = Uuid::new_v4();
        let _rx = rooms.register(conn).await;

        rooms.leave("never-joined", conn).await;
        rooms.send_to_room("never-joined", &GatewayEvent::Ready {
            user_id: Uuid::nil(),
        })
        .await;
    }

    #[tokio::test]
    async fn unregister_removes_all_memberships() {
        let rooms = RoomIndex::new();
        let conn = Uuid::new_v4();
        let mut rx = rooms.register(conn).await;

        rooms.join("a", conn).await;
        rooms.join("b", conn).await;
        rooms.unregister(conn).await;

        let event = GatewayEvent::Ready {
            user_id: Uuid::nil(),
        };
        rooms.send_to_room("a", &event).await;
        rooms.send_to_room("b", &event).await;
        rooms.broadcast_all(&event).await;

        assert!(rx.try_recv().is_err());
    }
}
