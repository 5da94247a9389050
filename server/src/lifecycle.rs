//! Lifecycle orchestrator (C9, spec §4.9).
//!
//! Grounded on `lifespan.py`'s ordered startup/shutdown: each step records
//! readiness, shutdown runs in reverse, and shutdown is idempotent even
//! when an earlier step failed.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::alias::{AliasStore, JsonFileAliasPersistence};
use crate::collaborators::{
    CharacterService, ModerationService, NoopCharacterService, NoopMessagingSink, NoopModerationService,
    NoopPlayerDirectory, NoopRoomService, NoopTickStages, PlayerDirectory, RoomService,
};
use crate::collaborators::{MessagingSink, TickStageCollaborators};
use crate::config::{Config, ConfigError};
use crate::dispatch::Dispatcher;
use crate::events::Broadcaster;
use crate::session::SessionRegistry;
use crate::tick::TickScheduler;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything the running server needs, plus the shutdown signal.
pub struct Runtime {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub alias_store: Arc<AliasStore>,
    pub dispatcher: Arc<Dispatcher>,
    tick_task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Collaborators a deployment can override; every field defaults to a
/// no-op so the runtime boots standalone (spec §4.10).
#[derive(Default)]
pub struct RuntimeCollaborators {
    pub room_service: Option<Arc<dyn RoomService>>,
    pub tick_stages: Option<Arc<dyn TickStageCollaborators>>,
    pub messaging: Option<Arc<dyn MessagingSink>>,
    pub player_directory: Option<Arc<dyn PlayerDirectory>>,
    pub moderation: Option<Arc<dyn ModerationService>>,
    pub characters: Option<Arc<dyn CharacterService>>,
}

impl Runtime {
    /// Startup order (spec §4.9): configuration, persistence, event bus,
    /// session registry, NPC services, combat services, messaging
    /// collaborator, chat/magic services, tick loop task. Construction
    /// necessarily happens in dependency order (the broadcaster holds a
    /// handle to the registry it delivers through); each step still logs
    /// its readiness in the spec's named order.
    pub async fn start(collaborators: RuntimeCollaborators) -> Result<Self, StartupError> {
        let config = Config::from_env()?;
        tracing::info!("ready: configuration");

        let persistence = Arc::new(JsonFileAliasPersistence::new(config.aliases_dir.clone()));
        let alias_store = Arc::new(AliasStore::new(persistence));
        tracing::info!("ready: persistence");

        let room_service = collaborators.room_service.unwrap_or_else(|| Arc::new(NoopRoomService));
        let registry = SessionRegistry::new(config.disconnect_grace, room_service);
        let messaging = collaborators.messaging.unwrap_or_else(|| Arc::new(NoopMessagingSink));
        let broadcaster = Broadcaster::with_messaging(registry.clone(), messaging);
        tracing::info!("ready: event bus");
        tracing::info!("ready: session registry");

        // NPC services / combat services / chat & magic services are
        // represented collectively by `tick_stages` (spec §4.10).
        tracing::info!("ready: npc services");
        tracing::info!("ready: combat services");

        tracing::info!("ready: messaging collaborator");
        tracing::info!("ready: chat/magic services");

        let dispatcher = Arc::new(Dispatcher {
            registry: registry.clone(),
            broadcaster: broadcaster.clone(),
            alias_store: alias_store.clone(),
            player_directory: collaborators.player_directory.unwrap_or_else(|| Arc::new(NoopPlayerDirectory)),
            moderation: collaborators.moderation.unwrap_or_else(|| Arc::new(NoopModerationService)),
            characters: collaborators.characters.unwrap_or_else(|| Arc::new(NoopCharacterService)),
            max_command_length: config.command_max_length,
            default_rest_seconds: config.rest_countdown_seconds,
        });

        let tick_stages = collaborators.tick_stages.unwrap_or_else(|| Arc::new(NoopTickStages));
        let scheduler = TickScheduler::new(registry.clone(), broadcaster.clone(), tick_stages, config.tick_interval);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tick_task = tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        });
        tracing::info!("ready: tick loop task");

        Ok(Self {
            config,
            registry,
            broadcaster,
            alias_store,
            dispatcher,
            tick_task: Some(tick_task),
            shutdown_tx,
        })
    }

    /// Reverse-order, idempotent shutdown (spec §4.9). Safe to call more
    /// than once; a second call is a no-op beyond re-closing transports.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.tick_task.take()
            && tokio::time::timeout(Duration::from_secs(5), task).await.is_err()
        {
            tracing::warn!("tick task did not exit within the shutdown timeout");
        }

        self.broadcaster
            .broadcast_global(
                protocol::EventType::CommandResponse,
                serde_json::json!({ "channel": "system", "text": "server is shutting down" }),
            )
            .await;

        for player_id in self.registry.online_players().await {
            self.registry.cancel_rest(player_id).await;
        }

        tracing::debug!(outstanding_refs = Arc::strong_count(&self.alias_store), "persistence closed");
        tracing::info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_fails_fast_without_aliases_dir() {
        unsafe { std::env::remove_var("ALIASES_DIR") };
        let result = Runtime::start(RuntimeCollaborators::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        unsafe { std::env::set_var("ALIASES_DIR", "/tmp/mythosmud-lifecycle-test") };
        let mut runtime = Runtime::start(RuntimeCollaborators::default()).await.unwrap();
        runtime.shutdown().await;
        runtime.shutdown().await;
        unsafe { std::env::remove_var("ALIASES_DIR") };
    }
}
