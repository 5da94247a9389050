//! Narrow trait boundaries to out-of-core services (spec §4.10, added).
//!
//! Persistence, auth, combat, NPC, and messaging services live outside
//! this crate. Rather than inline stub logic for them, the runtime depends
//! on small traits and ships no-op defaults, mirroring the teacher's
//! `backbone-lib::traits::BackEndArchitecture` boundary between transport
//! plumbing and game-specific logic.

use async_trait::async_trait;
use protocol::{Event, PlayerId, RoomId};

use crate::command::Direction;

/// Canonicalizes room identifiers before subscription-index lookups and
/// answers whether a room is flagged as a rest-location (spec §4.6's
/// `beginRest` short-circuit). The default treats every id as already
/// canonical and no room as a rest-location.
#[async_trait]
pub trait RoomService: Send + Sync {
    fn canonicalize(&self, room_id: &RoomId) -> RoomId {
        room_id.clone()
    }

    async fn is_rest_location(&self, _room_id: &RoomId) -> bool {
        false
    }

    async fn is_in_combat(&self, _player_id: PlayerId) -> bool {
        false
    }

    /// Resolves the room a `go <direction>` command leads to. Room
    /// topology is authored outside this core; the default has nowhere
    /// to send anyone.
    async fn resolve_exit(&self, _room_id: &RoomId, _direction: Direction) -> Option<RoomId> {
        None
    }
}

pub struct NoopRoomService;

impl RoomService for NoopRoomService {}

/// Per-tick hooks the tick loop (C8) invokes in a fixed order (spec §4.8
/// stages c, d, e, f, g). A no-op default lets the runtime run standalone
/// with only the in-core stages (status effects, tick counter, broadcast).
#[async_trait]
pub trait TickStageCollaborators: Send + Sync {
    async fn status_effects(&self, _tick: u64) -> Result<(), String> {
        Ok(())
    }
    async fn combat(&self, _tick: u64) -> Result<(), String> {
        Ok(())
    }
    async fn casting(&self, _tick: u64) -> Result<(), String> {
        Ok(())
    }
    async fn decay_and_death(&self, _tick: u64) -> Result<(), String> {
        Ok(())
    }
    async fn npc_maintenance(&self, _tick: u64) -> Result<(), String> {
        Ok(())
    }
    async fn corpse_cleanup(&self, _tick: u64) -> Result<(), String> {
        Ok(())
    }
}

pub struct NoopTickStages;

impl TickStageCollaborators for NoopTickStages {}

/// An outbound bus for cross-process fan-out (NATS or equivalent, spec
/// §4.9). The default is a no-op; startup failure to reach a real
/// messaging collaborator is non-fatal in test environments per spec §6.
#[async_trait]
pub trait MessagingSink: Send + Sync {
    async fn publish(&self, _subject: &str, _payload: &Event) {}
}

pub struct NoopMessagingSink;

impl MessagingSink for NoopMessagingSink {}

/// Resolves a display name to a [`PlayerId`] for targeted commands
/// (whisper, mute, teleport, goto). The player-record service that backs
/// this in a full deployment is out of core scope; the default never
/// resolves anyone.
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    async fn resolve(&self, _display_name: &str) -> Option<PlayerId> {
        None
    }
}

pub struct NoopPlayerDirectory;

impl PlayerDirectory for NoopPlayerDirectory {}

/// Backs the security-sensitive admin commands (spec §4.5). Actual mute
/// tables, admin rosters, and teleport targets live in a persistence
/// service this core does not own; the default reports the action as
/// unavailable without failing the request.
#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn mute(&self, _target: &str, _duration_minutes: Option<u32>) -> Result<String, String> {
        Err("moderation service not configured".into())
    }
    async fn unmute(&self, _target: &str) -> Result<String, String> {
        Err("moderation service not configured".into())
    }
    async fn mute_global(&self, _target: &str, _duration_minutes: Option<u32>) -> Result<String, String> {
        Err("moderation service not configured".into())
    }
    async fn unmute_global(&self, _target: &str) -> Result<String, String> {
        Err("moderation service not configured".into())
    }
    async fn list_mutes(&self) -> Vec<String> {
        Vec::new()
    }
    async fn add_admin(&self, _target: &str) -> Result<String, String> {
        Err("moderation service not configured".into())
    }
    async fn teleport(&self, _target: &str) -> Result<String, String> {
        Err("moderation service not configured".into())
    }
    async fn goto(&self, _target: &str) -> Result<String, String> {
        Err("moderation service not configured".into())
    }
}

pub struct NoopModerationService;

impl ModerationService for NoopModerationService {}

/// Character-sheet and help-text lookups (status/inventory/help). Backed
/// by the persistence layer this core does not own.
#[async_trait]
pub trait CharacterService: Send + Sync {
    async fn status_text(&self, _player_id: PlayerId) -> String {
        "status is unavailable in this configuration".into()
    }
    async fn inventory_text(&self, _player_id: PlayerId) -> String {
        "inventory is unavailable in this configuration".into()
    }
    async fn help_text(&self, _topic: Option<&str>) -> String {
        "no help content is configured".into()
    }
}

pub struct NoopCharacterService;

impl CharacterService for NoopCharacterService {}
