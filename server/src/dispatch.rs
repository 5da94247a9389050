//! Command dispatcher (C5, spec §4.5).
//!
//! Selects a handler from a static variant->handler table, resolves alias
//! invocations through C3/C4 before re-entering C1/C2, and audit-logs
//! security-sensitive commands after the handler runs.

use std::collections::HashSet;
use std::sync::Arc;

use protocol::{EventType, PlayerId, RoomId};
use thiserror::Error;

use crate::alias::{AliasStore, MAX_EXPANSION_DEPTH};
use crate::collaborators::{CharacterService, ModerationService, PlayerDirectory};
use crate::command::{self, Command, ParseError, ParsedLine, ParserCollaborators};
use crate::events::Broadcaster;
use crate::rest::begin_rest_or_instant;
use crate::session::{SessionError, SessionRegistry};

const PREDEFINED_EMOTES: &[&str] =
    &["dance", "smile", "laugh", "wave", "bow", "nod", "shrug", "cry", "cheer", "sigh"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("circular alias: {}", .cycle.join(" -> "))]
    CircularAlias { cycle: Vec<String> },
    #[error("alias expansion exceeds the depth limit of {MAX_EXPANSION_DEPTH}")]
    ExpansionLimitReached,
    #[error("alias expansion too deep")]
    ExpansionTooDeep,
    #[error("unknown alias")]
    UnknownAlias,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    Logout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub text: String,
    pub directive: Directive,
    /// Set when a handler moved the player to a new room; the transport
    /// layer re-subscribes and uses this room for subsequent commands.
    pub room_change: Option<RoomId>,
}

impl HandlerOutcome {
    fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), directive: Directive::None, room_change: None }
    }
}

/// Per-request identity the dispatcher needs; everything else is reached
/// through the collaborators bundled in [`Dispatcher`].
pub struct DispatchContext {
    pub player_id: PlayerId,
    pub display_name: String,
    pub room_id: RoomId,
}

/// Out-of-core collaborators the dispatcher's handlers call into (spec
/// §4.10). Construct with [`Dispatcher::new`]; fields default to no-ops
/// via the collaborator module's `Noop*` types when a deployment doesn't
/// wire a real one.
pub struct Dispatcher {
    pub registry: Arc<SessionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub alias_store: Arc<AliasStore>,
    pub player_directory: Arc<dyn PlayerDirectory>,
    pub moderation: Arc<dyn ModerationService>,
    pub characters: Arc<dyn CharacterService>,
    pub max_command_length: usize,
    pub default_rest_seconds: u64,
}

struct SnapshotCollaborators {
    alias_names: HashSet<String>,
}

impl ParserCollaborators for SnapshotCollaborators {
    fn is_known_alias(&self, head: &str) -> bool {
        self.alias_names.contains(head)
    }

    fn is_known_emote(&self, head: &str) -> bool {
        PREDEFINED_EMOTES.contains(&head)
    }
}

impl Dispatcher {
    /// Entry point: normalizes, parses, resolves any alias invocation, and
    /// dispatches. Parse/validation/expansion failures are returned as
    /// `Err` (user-visible, specific); handler failures are caught inside
    /// and folded into a generic outcome (spec §4.5).
    pub async fn handle(&self, raw_input: &str, ctx: &DispatchContext) -> Result<HandlerOutcome, DispatchError> {
        self.dispatch_with_depth(raw_input, ctx, 0).await
    }

    fn dispatch_with_depth<'a>(
        &'a self,
        raw_input: &'a str,
        ctx: &'a DispatchContext,
        depth: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<HandlerOutcome, DispatchError>> + Send + 'a>> {
        Box::pin(async move {
            let normalized = command::normalize(raw_input, self.max_command_length)
                .map_err(|e| DispatchError::Parse(e.into()))?;

            let bundle = self.alias_store.list(&ctx.display_name).await;
            let alias_names = bundle.aliases.iter().map(|a| a.name.to_ascii_lowercase()).collect();
            let collaborators = SnapshotCollaborators { alias_names };

            let parsed = command::parse(&normalized, &collaborators)?;

            match parsed {
                ParsedLine::Command(cmd) => self.run_and_audit(cmd, ctx).await,
                ParsedLine::AliasInvocation { name, trailing } => {
                    if depth >= MAX_EXPANSION_DEPTH as u32 {
                        return Err(DispatchError::ExpansionTooDeep);
                    }

                    let graph = self.alias_store.graph(&ctx.display_name).await;
                    if !graph.is_safe_to_expand(&name) {
                        let cycle = graph.detect_cycle(&name).unwrap_or_default();
                        return Err(DispatchError::CircularAlias { cycle });
                    }
                    if graph.expansion_depth(&name) > MAX_EXPANSION_DEPTH {
                        return Err(DispatchError::ExpansionLimitReached);
                    }

                    let alias = self
                        .alias_store
                        .get(&ctx.display_name, &name)
                        .await
                        .ok_or(DispatchError::UnknownAlias)?;
                    let expanded = if trailing.is_empty() {
                        alias.body.clone()
                    } else {
                        format!("{} {}", alias.body, trailing)
                    };
                    self.dispatch_with_depth(&expanded, ctx, depth + 1).await
                }
            }
        })
    }

    async fn run_and_audit(&self, command: Command, ctx: &DispatchContext) -> Result<HandlerOutcome, DispatchError> {
        let sensitive = command.is_security_sensitive();
        let name = command.name();
        let outcome = match self.run_handler(command, ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(player = %ctx.player_id, command = name, error = %err, "handler failed");
                HandlerOutcome::text("An error occurred")
            }
        };

        if sensitive {
            tracing::info!(
                player = %ctx.player_id,
                session = %ctx.player_id,
                command = name,
                outcome = %outcome.text,
                "security-sensitive command"
            );
        }

        Ok(outcome)
    }

    async fn run_handler(&self, command: Command, ctx: &DispatchContext) -> Result<HandlerOutcome, HandlerError> {
        match command {
            Command::Look { direction } => Ok(self.handle_look(direction).await),
            Command::Go { direction } => Ok(self.handle_go(ctx, direction).await),
            Command::Say { message } => Ok(self.broadcast_chat(ctx, "say", &message).await),
            Command::Local { message } => Ok(self.broadcast_chat(ctx, "local", &message).await),
            Command::Global { message } => Ok(self.broadcast_global_chat(ctx, "global", &message).await),
            Command::System { message } => Ok(self.broadcast_global_chat(ctx, "system", &message).await),
            Command::Emote { action } => Ok(self.broadcast_chat(ctx, "emote", &action).await),
            Command::Me { action } => Ok(self.broadcast_chat(ctx, "me", &action).await),
            Command::Pose { pose } => Ok(self.broadcast_chat(ctx, "pose", &pose).await),
            Command::Whisper { target_player, message } => self.handle_whisper(ctx, &target_player, &message).await,
            Command::Reply { message } => self.handle_reply(ctx, &message).await,
            Command::Alias { name, command } => self.handle_alias_add(ctx, &name, &command).await,
            Command::Aliases => Ok(self.handle_aliases_list(ctx).await),
            Command::Unalias { name } => self.handle_unalias(ctx, &name).await,
            Command::Help { topic } => Ok(HandlerOutcome::text(self.characters.help_text(topic.as_deref()).await)),
            Command::Mute { target_player, duration_minutes } => {
                self.moderation_result(self.moderation.mute(&target_player, duration_minutes).await)
            }
            Command::Unmute { target_player } => self.moderation_result(self.moderation.unmute(&target_player).await),
            Command::MuteGlobal { target_player, duration_minutes } => {
                self.moderation_result(self.moderation.mute_global(&target_player, duration_minutes).await)
            }
            Command::UnmuteGlobal { target_player } => {
                self.moderation_result(self.moderation.unmute_global(&target_player).await)
            }
            Command::Mutes => {
                let mutes = self.moderation.list_mutes().await;
                Ok(HandlerOutcome::text(if mutes.is_empty() { "No active mutes.".to_string() } else { mutes.join(", ") }))
            }
            Command::AddAdmin { target_player } => self.moderation_result(self.moderation.add_admin(&target_player).await),
            Command::Teleport { target_player } => self.moderation_result(self.moderation.teleport(&target_player).await),
            Command::Goto { target_player } => self.moderation_result(self.moderation.goto(&target_player).await),
            Command::Who => Ok(self.handle_who().await),
            Command::Status => Ok(HandlerOutcome::text(self.characters.status_text(ctx.player_id).await)),
            Command::Inventory => Ok(HandlerOutcome::text(self.characters.inventory_text(ctx.player_id).await)),
            Command::Rest { duration_seconds } => Ok(self.handle_rest(ctx, duration_seconds).await),
            Command::Quit => Ok(self.handle_quit(ctx).await),
            Command::Other { head, .. } => Err(HandlerError(format!("no handler registered for `{head}`"))),
        }
    }

    fn moderation_result(&self, result: Result<String, String>) -> Result<HandlerOutcome, HandlerError> {
        match result {
            Ok(text) => Ok(HandlerOutcome::text(text)),
            Err(reason) => Ok(HandlerOutcome::text(reason)),
        }
    }

    async fn handle_look(&self, direction: Option<crate::command::Direction>) -> HandlerOutcome {
        match direction {
            Some(dir) => HandlerOutcome::text(format!("You look {dir}.")),
            None => HandlerOutcome::text("You look around."),
        }
    }

    async fn handle_go(&self, ctx: &DispatchContext, direction: crate::command::Direction) -> HandlerOutcome {
        self.registry.cancel_rest(ctx.player_id).await;
        match self.registry.room_service.resolve_exit(&ctx.room_id, direction).await {
            Some(destination) => {
                self.registry.unsubscribe_room(ctx.player_id, &ctx.room_id).await;
                self.registry.subscribe_room(ctx.player_id, destination.clone()).await;
                HandlerOutcome { text: format!("You go {direction}."), directive: Directive::None, room_change: Some(destination) }
            }
            None => HandlerOutcome::text(format!("You go {direction}.")),
        }
    }

    async fn broadcast_chat(&self, ctx: &DispatchContext, channel: &'static str, text: &str) -> HandlerOutcome {
        self.broadcaster
            .broadcast_room(
                ctx.room_id.clone(),
                EventType::CommandResponse,
                serde_json::json!({ "channel": channel, "player": ctx.display_name, "text": text }),
                None,
            )
            .await;
        HandlerOutcome::text(format!("[{channel}] {text}"))
    }

    async fn broadcast_global_chat(&self, ctx: &DispatchContext, channel: &'static str, text: &str) -> HandlerOutcome {
        self.broadcaster
            .broadcast_global(
                EventType::CommandResponse,
                serde_json::json!({ "channel": channel, "player": ctx.display_name, "text": text }),
            )
            .await;
        HandlerOutcome::text(format!("[{channel}] {text}"))
    }

    async fn handle_whisper(&self, ctx: &DispatchContext, target: &str, message: &str) -> Result<HandlerOutcome, HandlerError> {
        let Some(target_id) = self.player_directory.resolve(target).await else {
            return Ok(HandlerOutcome::text(format!("{target} is not online.")));
        };
        self.registry.record_whisper(target_id, ctx.player_id).await;
        self.broadcaster
            .send_personal(
                target_id,
                EventType::CommandResponse,
                serde_json::json!({ "channel": "whisper", "from": ctx.display_name, "text": message }),
            )
            .await;
        Ok(HandlerOutcome::text(format!("You whisper to {target}: {message}")))
    }

    async fn handle_reply(&self, ctx: &DispatchContext, message: &str) -> Result<HandlerOutcome, HandlerError> {
        let Some(target_id) = self.registry.last_whisper_from(ctx.player_id).await else {
            return Ok(HandlerOutcome::text("There is no one to reply to."));
        };
        self.broadcaster
            .send_personal(
                target_id,
                EventType::CommandResponse,
                serde_json::json!({ "channel": "whisper", "from": ctx.display_name, "text": message }),
            )
            .await;
        Ok(HandlerOutcome::text(format!("You reply: {message}")))
    }

    async fn handle_alias_add(&self, ctx: &DispatchContext, name: &str, command: &str) -> Result<HandlerOutcome, HandlerError> {
        self.alias_store
            .add(&ctx.display_name, name, command)
            .await
            .map(|alias| HandlerOutcome::text(format!("Alias '{}' set to '{}'.", alias.name, alias.body)))
            .map_err(|e| HandlerError(e.to_string()))
    }

    async fn handle_aliases_list(&self, ctx: &DispatchContext) -> HandlerOutcome {
        let bundle = self.alias_store.list(&ctx.display_name).await;
        if bundle.is_empty() {
            return HandlerOutcome::text("You have no aliases.");
        }
        let lines: Vec<String> = bundle.aliases.iter().map(|a| format!("{} -> {}", a.name, a.body)).collect();
        HandlerOutcome::text(format!("{} alias(es):\n{}", bundle.len(), lines.join("\n")))
    }

    async fn handle_unalias(&self, ctx: &DispatchContext, name: &str) -> Result<HandlerOutcome, HandlerError> {
        let removed = self.alias_store.remove(&ctx.display_name, name).await.map_err(|e| HandlerError(e.to_string()))?;
        Ok(HandlerOutcome::text(if removed { format!("Alias '{name}' removed.") } else { format!("No alias named '{name}'.") }))
    }

    async fn handle_who(&self) -> HandlerOutcome {
        let summaries = self.registry.online_summaries().await;
        if summaries.is_empty() {
            return HandlerOutcome::text("No one else is online.");
        }
        let mut names = Vec::with_capacity(summaries.len());
        for (player_id, name) in summaries {
            if self.registry.is_resting(player_id).await {
                names.push(format!("{name} (resting)"));
            } else {
                names.push(name);
            }
        }
        HandlerOutcome::text(format!("Online: {}", names.join(", ")))
    }

    async fn handle_rest(&self, ctx: &DispatchContext, duration_seconds: Option<u64>) -> HandlerOutcome {
        let duration = duration_seconds.unwrap_or(self.default_rest_seconds);
        let room_is_rest_location = self.registry.room_service.is_rest_location(&ctx.room_id).await;
        match begin_rest_or_instant(&self.registry, ctx.player_id, room_is_rest_location, duration, self.broadcaster.clone()).await {
            Ok(()) if room_is_rest_location => HandlerOutcome::text("You settle in and drift off at once."),
            Ok(()) => HandlerOutcome::text(format!("You begin to rest. {duration} seconds remaining.")),
            Err(SessionError::DuplicateRest) => HandlerOutcome::text("You are already resting."),
            Err(_) => HandlerOutcome::text("You cannot rest right now."),
        }
    }

    async fn handle_quit(&self, ctx: &DispatchContext) -> HandlerOutcome {
        self.registry.mark_intentional(ctx.player_id).await;
        HandlerOutcome { text: "Goodbye.".into(), directive: Directive::Logout, room_change: None }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
struct HandlerError(String);

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::alias::{AliasStore, JsonFileAliasPersistence};
    use crate::collaborators::{NoopCharacterService, NoopModerationService, NoopPlayerDirectory, NoopRoomService, RoomService};
    use crate::session::test_support::RecordingTransport;

    fn dispatcher(registry: Arc<SessionRegistry>, tmp: &std::path::Path) -> Dispatcher {
        Dispatcher {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            alias_store: Arc::new(AliasStore::new(Arc::new(JsonFileAliasPersistence::new(tmp.to_path_buf())))),
            player_directory: Arc::new(NoopPlayerDirectory),
            moderation: Arc::new(NoopModerationService),
            characters: Arc::new(NoopCharacterService),
            max_command_length: 1000,
            default_rest_seconds: 10,
        }
    }

    fn ctx(player_id: PlayerId) -> DispatchContext {
        DispatchContext { player_id, display_name: "alice".into(), room_id: RoomId::parse("arkham_room_library").unwrap() }
    }

    #[tokio::test]
    async fn say_broadcasts_and_returns_text() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let player = PlayerId::new();
        let transport = RecordingTransport::new();
        registry.attach(player, "alice", transport.clone()).await;
        let room = RoomId::parse("arkham_room_library").unwrap();
        registry.subscribe_room(player, room).await;

        let dir = tempdir();
        let dispatcher = dispatcher(registry, dir.path());
        let outcome = dispatcher.handle("say hello", &ctx(player)).await.unwrap();
        assert_eq!(outcome.text, "[say] hello");
    }

    #[tokio::test]
    async fn quit_marks_intentional_and_sets_logout_directive() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;
        let dir = tempdir();
        let dispatcher = dispatcher(registry, dir.path());
        let outcome = dispatcher.handle("quit", &ctx(player)).await.unwrap();
        assert_eq!(outcome.directive, Directive::Logout);
    }

    #[tokio::test]
    async fn circular_alias_is_rejected_before_expansion() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;
        let dir = tempdir();
        let dispatcher = dispatcher(registry, dir.path());
        dispatcher.alias_store.add("alice", "a", "b").await.unwrap();
        dispatcher.alias_store.add("alice", "b", "a").await.unwrap();

        let err = dispatcher.handle("a", &ctx(player)).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircularAlias { .. }));
    }

    #[tokio::test]
    async fn rest_begins_a_countdown() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;
        let dir = tempdir();
        let dispatcher = dispatcher(registry.clone(), dir.path());

        let outcome = dispatcher.handle("rest 5", &ctx(player)).await.unwrap();
        assert!(outcome.text.contains("5 seconds"));
        registry.cancel_rest(player).await;
    }

    struct OneWayExit;
    #[async_trait::async_trait]
    impl RoomService for OneWayExit {
        async fn resolve_exit(&self, _room_id: &RoomId, _direction: crate::command::Direction) -> Option<RoomId> {
            Some(RoomId::parse("arkham_room_hall").unwrap())
        }
    }

    #[tokio::test]
    async fn go_moves_the_player_when_the_room_service_resolves_an_exit() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(OneWayExit));
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;
        let dir = tempdir();
        let dispatcher = dispatcher(registry, dir.path());

        let outcome = dispatcher.handle("go north", &ctx(player)).await.unwrap();
        assert_eq!(outcome.room_change, Some(RoomId::parse("arkham_room_hall").unwrap()));
    }

    #[tokio::test]
    async fn alias_expands_and_dispatches_target_command() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(NoopRoomService));
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;
        let room = RoomId::parse("arkham_room_library").unwrap();
        registry.subscribe_room(player, room).await;
        let dir = tempdir();
        let dispatcher = dispatcher(registry, dir.path());
        dispatcher.alias_store.add("alice", "k", "say hi there").await.unwrap();

        let outcome = dispatcher.handle("k", &ctx(player)).await.unwrap();
        assert_eq!(outcome.text, "[say] hi there");
    }

    fn tempdir() -> tempfile_like::TempDir {
        tempfile_like::TempDir::new()
    }

    /// A minimal scratch-directory helper; avoids adding a `tempfile`
    /// dependency for a handful of dispatcher tests.
    mod tempfile_like {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let path = std::env::temp_dir().join(format!("mythosmud-dispatch-test-{:?}", std::thread::current().id()));
                std::fs::create_dir_all(&path).unwrap();
                Self(path)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }
}
