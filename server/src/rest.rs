//! Rest-countdown state machine (spec §4.6: `Idle -> Counting -> Completed|Cancelled`).
//!
//! Grounded on `rest_command.py` / `rest_countdown_task.py`'s control
//! flow: per-whole-second tick messages, interruption on combat/movement/
//! casting, and an instant-disconnect short-circuit in rest-flagged rooms.
//! The original's `#region agent log` debug instrumentation is not carried
//! over — only the control flow it wraps.

use std::sync::Arc;
use std::time::Duration;

use protocol::{EventType, PlayerId};

use crate::events::Broadcaster;
use crate::session::{SessionError, SessionRegistry};

impl SessionRegistry {
    /// Entry to `Counting` (spec §4.6). Returns `Err(DuplicateRest)` if a
    /// countdown is already active for this player.
    pub async fn begin_rest(
        self: &Arc<Self>,
        player_id: PlayerId,
        duration_secs: u64,
        broadcaster: Arc<Broadcaster>,
    ) -> Result<(), SessionError> {
        if self.room_service.is_in_combat(player_id).await {
            return Err(SessionError::DuplicateRest);
        }
        if !self.online_players().await.contains(&player_id) {
            return Err(SessionError::SessionMissing);
        }

        self.begin_rest_task(player_id, move |registry| run_countdown(registry, player_id, duration_secs, broadcaster)).await
    }
}

async fn run_countdown(registry: Arc<SessionRegistry>, player_id: PlayerId, duration_secs: u64, broadcaster: Arc<Broadcaster>) {
    let mut remaining = duration_secs;
    while remaining > 0 {
        broadcaster
            .send_personal(
                player_id,
                EventType::CommandResponse,
                serde_json::json!({ "message": format!("{remaining} seconds remaining") }),
            )
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        remaining -= 1;
    }
    broadcaster
        .send_personal(player_id, EventType::IntentionalDisconnect, serde_json::json!({}))
        .await;
    registry.complete_rest(player_id).await;
}

/// Instant-disconnect short-circuit for rest-flagged rooms (spec §4.6):
/// `beginRest` skips straight to `Completed` without a countdown.
pub async fn begin_rest_or_instant(
    registry: &Arc<SessionRegistry>,
    player_id: PlayerId,
    room_is_rest_location: bool,
    duration_secs: u64,
    broadcaster: Arc<Broadcaster>,
) -> Result<(), SessionError> {
    if room_is_rest_location && !registry.room_service.is_in_combat(player_id).await {
        broadcaster
            .send_personal(player_id, EventType::IntentionalDisconnect, serde_json::json!({}))
            .await;
        registry.complete_rest(player_id).await;
        return Ok(());
    }
    registry.begin_rest(player_id, duration_secs, broadcaster).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoopRoomService;
    use crate::session::test_support::RecordingTransport;

    #[tokio::test]
    async fn countdown_sends_per_second_messages_then_disconnects() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let player = PlayerId::new();
        let transport = RecordingTransport::new();
        registry.attach(player, "alice", transport.clone()).await;

        registry.clone().begin_rest(player, 1, broadcaster.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert!(!registry.online_players().await.contains(&player));
        let sent = transport.sent.lock().await;
        assert!(sent.iter().any(|m| m.contains("1 seconds remaining")));
        assert!(sent.iter().any(|m| m.contains("intentional_disconnect")));
    }

    #[tokio::test]
    async fn duplicate_rest_is_rejected() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;

        registry.clone().begin_rest(player, 5, broadcaster.clone()).await.unwrap();
        let err = registry.clone().begin_rest(player, 1, broadcaster).await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateRest));
        registry.cancel_rest(player).await;
    }

    #[tokio::test]
    async fn rejected_duplicate_does_not_leave_a_rogue_countdown_running() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;

        registry.clone().begin_rest(player, 30, broadcaster.clone()).await.unwrap();
        let err = registry.clone().begin_rest(player, 1, broadcaster).await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateRest));

        // If a rejected duplicate had spawned and detached its own
        // countdown task, that task's 1-second clock would complete here
        // and force-disconnect the player out from under the legitimate
        // 30-second rest.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(registry.online_players().await.contains(&player));
        assert!(registry.is_resting(player).await);
        registry.cancel_rest(player).await;
    }

    #[tokio::test]
    async fn instant_short_circuit_in_rest_location_skips_countdown() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;

        begin_rest_or_instant(&registry, player, true, 10, broadcaster).await.unwrap();
        assert!(!registry.online_players().await.contains(&player));
    }
}
