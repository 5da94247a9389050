//! Event bus / broadcaster (C7, spec §4.7).
//!
//! Builds [`protocol::Event`] envelopes with a monotonic sequence number and
//! delivers them through the session registry (C6). Grounded on the
//! teacher's `broadcast::Sender<Bytes>` fan-out in `lobby.rs`, generalized
//! from a single room channel to player/room/global routing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use protocol::{Event, EventType, PlayerId, RoomId, Routing};

use crate::collaborators::MessagingSink;
#[cfg(test)]
use crate::collaborators::NoopMessagingSink;
use crate::session::{DeliverySummary, SessionRegistry};

/// Builds and delivers events. One instance is shared for the lifetime of
/// the server (spec §4.7: "sequence numbers are monotonic for the life of
/// the process"). Every built event is also handed to the messaging
/// collaborator for cross-process fan-out (spec §4.9).
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    sequence: AtomicU64,
    messaging: Arc<dyn MessagingSink>,
}

impl Broadcaster {
    /// Builds a broadcaster with no outbound messaging collaborator wired
    /// (spec §4.10's no-op default); use [`Broadcaster::with_messaging`]
    /// once a real cross-process bus is available.
    #[cfg(test)]
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        Self::with_messaging(registry, Arc::new(NoopMessagingSink))
    }

    pub fn with_messaging(registry: Arc<SessionRegistry>, messaging: Arc<dyn MessagingSink>) -> Arc<Self> {
        Arc::new(Self { registry, sequence: AtomicU64::new(0), messaging })
    }

    fn build(&self, event_type: EventType, data: serde_json::Value, routing: Routing) -> Event {
        Event {
            event_type,
            data,
            timestamp: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            routing,
        }
    }

    pub async fn send_personal(&self, player_id: PlayerId, event_type: EventType, data: serde_json::Value) -> DeliverySummary {
        let event = self.build(event_type, data, Routing::Player { player_id });
        self.messaging.publish(&format!("player.{player_id}"), &event).await;
        self.registry.send_to_player(player_id, &event.to_wire().to_string()).await
    }

    pub async fn broadcast_room(
        &self,
        room_id: RoomId,
        event_type: EventType,
        data: serde_json::Value,
        exclude: Option<PlayerId>,
    ) -> DeliverySummary {
        let event = self.build(event_type, data, Routing::Room { room_id: room_id.clone(), exclude });
        self.messaging.publish(&format!("room.{room_id}"), &event).await;
        self.registry.broadcast_to_room(&room_id, &event.to_wire().to_string(), exclude).await
    }

    pub async fn broadcast_global(&self, event_type: EventType, data: serde_json::Value) -> DeliverySummary {
        let event = self.build(event_type, data, Routing::Global);
        self.messaging.publish("global", &event).await;
        self.registry.broadcast_global(&event.to_wire().to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::test_support::RecordingTransport;

    #[tokio::test]
    async fn sequence_numbers_are_monotonic() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(crate::collaborators::NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;

        broadcaster.send_personal(player, EventType::CommandResponse, serde_json::json!({})).await;
        broadcaster.send_personal(player, EventType::CommandResponse, serde_json::json!({})).await;
        assert_eq!(broadcaster.sequence.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn room_broadcast_reaches_subscribers_only() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(crate::collaborators::NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let room = RoomId::parse("arkham_room_library").unwrap();
        let member = PlayerId::new();
        let stranger = PlayerId::new();
        let member_transport = RecordingTransport::new();
        let stranger_transport = RecordingTransport::new();
        registry.attach(member, "member", member_transport.clone()).await;
        registry.attach(stranger, "stranger", stranger_transport.clone()).await;
        registry.subscribe_room(member, room.clone()).await;

        let summary = broadcaster.broadcast_room(room, EventType::GameTick, serde_json::json!({}), None).await;
        assert_eq!(summary.success, 1);
        assert_eq!(member_transport.sent.lock().await.len(), 1);
        assert!(stranger_transport.sent.lock().await.is_empty());
    }
}
