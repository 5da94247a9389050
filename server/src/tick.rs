//! Tick scheduler (C8, spec §4.8).
//!
//! Grounded on the teacher's `main.rs` watchdog (`tokio::time::interval`
//! driving a periodic sweep); generalized from a single dead-room sweep
//! into the fixed-order staged tick this runtime requires. Every stage is
//! guarded so that one stage's failure never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use protocol::EventType;
use tokio::sync::watch;

use crate::collaborators::TickStageCollaborators;
use crate::events::Broadcaster;
use crate::session::SessionRegistry;

/// NPC maintenance and corpse cleanup run every 60th tick (spec §4.8f-g).
const MAINTENANCE_PERIOD: u64 = 60;

pub struct TickScheduler {
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<Broadcaster>,
    collaborators: Arc<dyn TickStageCollaborators>,
    interval: Duration,
}

impl TickScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        broadcaster: Arc<Broadcaster>,
        collaborators: Arc<dyn TickStageCollaborators>,
        interval: Duration,
    ) -> Self {
        Self { registry, broadcaster, collaborators, interval }
    }

    /// Runs until `shutdown` signals `true`. Cancellation is cooperative:
    /// the loop finishes its current stage, then exits (spec §4.8, §4.9).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick_count: u64 = 0;
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick_count += 1;
                    self.run_tick(tick_count).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_tick(&self, tick_count: u64) {
        self.guard(tick_count, "status_effects", self.collaborators.status_effects(tick_count)).await;
        // (b) the tick counter itself is `tick_count`, threaded into every
        // subsequent stage and the broadcast below.
        self.guard(tick_count, "combat", self.collaborators.combat(tick_count)).await;
        self.guard(tick_count, "casting", self.collaborators.casting(tick_count)).await;
        self.guard(tick_count, "decay_and_death", self.collaborators.decay_and_death(tick_count)).await;

        if tick_count.is_multiple_of(MAINTENANCE_PERIOD) {
            self.guard(tick_count, "npc_maintenance", self.collaborators.npc_maintenance(tick_count)).await;
            self.guard(tick_count, "corpse_cleanup", self.collaborators.corpse_cleanup(tick_count)).await;
        }

        let active_players = self.registry.online_count().await;
        self.broadcaster
            .broadcast_global(
                EventType::GameTick,
                serde_json::json!({ "tick_number": tick_count, "active_players": active_players }),
            )
            .await;
    }

    async fn guard(&self, tick_count: u64, stage: &'static str, future: impl std::future::Future<Output = Result<(), String>>) {
        if let Err(error) = future.await {
            tracing::error!(tick = tick_count, stage, error, "tick stage failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::collaborators::NoopRoomService;
    use crate::session::test_support::RecordingTransport;

    struct CountingStages {
        combat_calls: AtomicU64,
    }

    #[async_trait]
    impl TickStageCollaborators for CountingStages {
        async fn combat(&self, _tick: u64) -> Result<(), String> {
            self.combat_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingStages;

    #[async_trait]
    impl TickStageCollaborators for FailingStages {
        async fn combat(&self, _tick: u64) -> Result<(), String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn broadcasts_game_tick_with_active_player_count() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let player = protocol::PlayerId::new();
        let transport = RecordingTransport::new();
        registry.attach(player, "alice", transport.clone()).await;
        let broadcaster = Broadcaster::new(registry.clone());
        let scheduler = TickScheduler::new(registry, broadcaster, Arc::new(CountingStages { combat_calls: AtomicU64::new(0) }), Duration::from_millis(10));

        scheduler.run_tick(1).await;

        let sent = transport.sent.lock().await;
        let wire: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(wire["event_type"], "game_tick");
        assert_eq!(wire["data"]["active_players"], 1);
    }

    #[tokio::test]
    async fn a_failing_stage_does_not_prevent_the_broadcast() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let scheduler = TickScheduler::new(registry, broadcaster, Arc::new(FailingStages), Duration::from_millis(10));
        scheduler.run_tick(1).await;
    }

    #[tokio::test]
    async fn maintenance_stages_run_only_on_the_60th_tick() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let broadcaster = Broadcaster::new(registry.clone());
        let calls = Arc::new(AtomicU64::new(0));

        struct Tracking(Arc<AtomicU64>);
        #[async_trait]
        impl TickStageCollaborators for Tracking {
            async fn npc_maintenance(&self, _tick: u64) -> Result<(), String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let scheduler = TickScheduler::new(registry, broadcaster, Arc::new(Tracking(calls.clone())), Duration::from_millis(10));
        scheduler.run_tick(59).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        scheduler.run_tick(60).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
