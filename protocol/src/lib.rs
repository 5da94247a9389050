//! Wire types shared between the MythosMUD session runtime and its clients.
//!
//! Everything here crosses the WebSocket boundary as JSON. There is no
//! binary framing: a client frame is a command string, a server frame is
//! a serialized [`Event`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, 128-bit player identifier. Stable across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short textual room identifier. Identity only; content lives in a room
/// registry collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

/// Rejected room id shapes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("room id must not be empty")]
    Empty,
    #[error("room id contains characters outside [a-z0-9_]")]
    InvalidCharacters,
    #[error("room id must end with a `_room_...` or `_intersection_...` suffix")]
    MissingSuffix,
}

impl RoomId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, RoomIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(RoomIdError::InvalidCharacters);
        }
        if !raw.contains("_room_") && !raw.contains("_intersection_") {
            return Err(RoomIdError::MissingSuffix);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of event types emitted by the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommandResponse,
    GameTick,
    CombatStarted,
    CombatAttack,
    CombatAttackPersonal,
    CombatDeath,
    CombatEnded,
    CombatError,
    PlayerMortallyWounded,
    PlayerMortallyWoundedRoom,
    PlayerDied,
    PlayerDiedRoom,
    PlayerRespawned,
    PlayerRespawnedRoom,
    PlayerDpDecay,
    IntentionalDisconnect,
    ContainerDecayed,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", value.as_str().unwrap_or("unknown"))
    }
}

/// Where an event is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    Player {
        player_id: PlayerId,
    },
    Room {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        exclude: Option<PlayerId>,
    },
    Global,
}

/// An immutable, fully built event ready for delivery.
///
/// Built exclusively through the broadcaster so every instance carries a
/// monotonic sequence number and a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub routing: Routing,
}

impl Event {
    /// Wire shape sent to clients: `{event_type, data, timestamp, sequence, player_id?, room_id?}`.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "event_type": self.event_type,
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
            "sequence": self.sequence,
        });
        match &self.routing {
            Routing::Player { player_id } => {
                value["player_id"] = serde_json::json!(player_id.to_string());
            }
            Routing::Room { room_id, .. } => {
                value["room_id"] = serde_json::json!(room_id.as_str());
            }
            Routing::Global => {}
        }
        value
    }
}
