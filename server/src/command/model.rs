//! The closed command variant set (spec §3, §3.1) and its typed payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Compass direction for `look`/`go`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Direction {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "north" => Some(Self::North),
            "south" => Some(Self::South),
            "east" => Some(Self::East),
            "west" => Some(Self::West),
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Self::North => "north",
            Self::South => "south",
            Self::East => "east",
            Self::West => "west",
            Self::Up => "up",
            Self::Down => "down",
        };
        write!(f, "{word}")
    }
}

/// A validated command, ready for the dispatcher.
///
/// Each variant carries its own typed argument record (spec §3); free-text
/// fields have already passed the §4.2 injection screen by the time a
/// `Command` value exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Look { direction: Option<Direction> },
    Go { direction: Direction },
    Say { message: String },
    Local { message: String },
    Global { message: String },
    System { message: String },
    Emote { action: String },
    Me { action: String },
    Pose { pose: String },
    Whisper { target_player: String, message: String },
    Reply { message: String },
    Alias { name: String, command: String },
    Aliases,
    Unalias { name: String },
    Help { topic: Option<String> },
    Mute { target_player: String, duration_minutes: Option<u32> },
    Unmute { target_player: String },
    MuteGlobal { target_player: String, duration_minutes: Option<u32> },
    UnmuteGlobal { target_player: String },
    Mutes,
    AddAdmin { target_player: String },
    Teleport { target_player: String },
    Goto { target_player: String },
    Who,
    Status,
    Inventory,
    Rest { duration_seconds: Option<u64> },
    Quit,
    /// Anything else the closed set does not name (combat/positional
    /// variants this core does not resolve itself; see SPEC_FULL.md §3.1).
    Other { head: String, args: Vec<String> },
}

impl Command {
    /// Variants the dispatcher must audit-log after running (spec §4.5).
    pub fn is_security_sensitive(&self) -> bool {
        matches!(
            self,
            Command::Mute { .. }
                | Command::Unmute { .. }
                | Command::MuteGlobal { .. }
                | Command::UnmuteGlobal { .. }
                | Command::AddAdmin { .. }
                | Command::Teleport { .. }
                | Command::Goto { .. }
        )
    }

    /// A short machine name, used in audit records and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Look { .. } => "look",
            Command::Go { .. } => "go",
            Command::Say { .. } => "say",
            Command::Local { .. } => "local",
            Command::Global { .. } => "global",
            Command::System { .. } => "system",
            Command::Emote { .. } => "emote",
            Command::Me { .. } => "me",
            Command::Pose { .. } => "pose",
            Command::Whisper { .. } => "whisper",
            Command::Reply { .. } => "reply",
            Command::Alias { .. } => "alias",
            Command::Aliases => "aliases",
            Command::Unalias { .. } => "unalias",
            Command::Help { .. } => "help",
            Command::Mute { .. } => "mute",
            Command::Unmute { .. } => "unmute",
            Command::MuteGlobal { .. } => "mute_global",
            Command::UnmuteGlobal { .. } => "unmute_global",
            Command::Mutes => "mutes",
            Command::AddAdmin { .. } => "add_admin",
            Command::Teleport { .. } => "teleport",
            Command::Goto { .. } => "goto",
            Command::Who => "who",
            Command::Status => "status",
            Command::Inventory => "inventory",
            Command::Rest { .. } => "rest",
            Command::Quit => "quit",
            Command::Other { .. } => "other",
        }
    }
}
