//! Command parser (C2, spec §4.2).

use thiserror::Error;

use super::injection::{self, FieldError, InjectionError};
use super::model::{Command, Direction};
use super::normalize::NormalizeError;

/// Collaborators the parser consults to resolve a head word that is not in
/// the closed command set (spec §4.2 step 3).
pub trait ParserCollaborators {
    fn is_known_alias(&self, head: &str) -> bool;
    fn is_known_emote(&self, head: &str) -> bool;
}

/// A head word that isn't a closed-set command still needs a verdict: is it
/// an alias invocation (for C4/C5 to expand) or a resolved command.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Command(Command),
    /// Head resolved to a registered player alias; C5 expands it via C4.
    AliasInvocation { name: String, trailing: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("unknown command")]
    UnknownCommand,
    #[error("bad argument for `{field}`: {reason}")]
    BadArguments { field: &'static str, reason: String },
    #[error("blocked: {0}")]
    InjectionBlocked(InjectionError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl From<FieldError> for ParseError {
    fn from(err: FieldError) -> Self {
        match err {
            FieldError::Empty => ParseError::BadArguments { field: "message", reason: "must not be empty".into() },
            FieldError::TooLong { max } => {
                ParseError::BadArguments { field: "message", reason: format!("exceeds {max} characters") }
            }
            FieldError::Injection(inj) => ParseError::InjectionBlocked(inj),
        }
    }
}

const PLAYER_NAME_MAX: usize = 50;

fn validate_player_name(name: &str) -> Result<String, ParseError> {
    let valid = !name.is_empty()
        && name.len() <= PLAYER_NAME_MAX
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(name.to_string())
    } else {
        Err(ParseError::BadArguments {
            field: "player_name",
            reason: "must match ^[A-Za-z][A-Za-z0-9_-]*$, length 1-50".into(),
        })
    }
}

fn validate_duration(raw: &str) -> Result<Option<u32>, ParseError> {
    let minutes: u32 = raw.parse().map_err(|_| ParseError::BadArguments {
        field: "duration_minutes",
        reason: "must be an integer".into(),
    })?;
    if !(1..=10080).contains(&minutes) {
        return Err(ParseError::BadArguments {
            field: "duration_minutes",
            reason: "must be between 1 and 10080 minutes".into(),
        });
    }
    Ok(Some(minutes))
}

fn validate_rest_seconds(raw: &str) -> Result<u64, ParseError> {
    let seconds: u64 = raw.parse().map_err(|_| ParseError::BadArguments {
        field: "duration_seconds",
        reason: "must be an integer".into(),
    })?;
    if !(1..=3600).contains(&seconds) {
        return Err(ParseError::BadArguments {
            field: "duration_seconds",
            reason: "must be between 1 and 3600 seconds".into(),
        });
    }
    Ok(seconds)
}

/// Resolves single-letter channel shortcuts before the closed-set lookup.
fn resolve_short_alias(head: &str) -> &str {
    match head {
        "l" => "local",
        "w" => "whisper",
        "g" => "global",
        other => other,
    }
}

/// Parses normalized text into either a validated [`Command`] or an alias
/// invocation for the dispatcher to expand.
pub fn parse(normalized: &str, collaborators: &dyn ParserCollaborators) -> Result<ParsedLine, ParseError> {
    if normalized.is_empty() {
        return Err(ParseError::EmptyCommand);
    }

    let mut parts = normalized.splitn(2, ' ');
    let raw_head = parts.next().unwrap_or("");
    let args = parts.next().unwrap_or("").trim();
    let head = resolve_short_alias(&raw_head.to_ascii_lowercase()).to_string();

    if !is_closed_command(&head) {
        if collaborators.is_known_alias(&head) {
            return Ok(ParsedLine::AliasInvocation { name: head, trailing: args.to_string() });
        }
        if collaborators.is_known_emote(&head) {
            return Ok(ParsedLine::Command(Command::Emote { action: head }));
        }
        return Err(ParseError::UnknownCommand);
    }

    build_command(&head, args).map(ParsedLine::Command)
}

fn is_closed_command(head: &str) -> bool {
    matches!(
        head,
        "look"
            | "go"
            | "say"
            | "local"
            | "global"
            | "system"
            | "emote"
            | "me"
            | "pose"
            | "whisper"
            | "reply"
            | "alias"
            | "aliases"
            | "unalias"
            | "help"
            | "mute"
            | "unmute"
            | "mute_global"
            | "unmute_global"
            | "mutes"
            | "add_admin"
            | "teleport"
            | "goto"
            | "who"
            | "status"
            | "inventory"
            | "rest"
            | "quit"
    )
}

fn build_command(head: &str, args: &str) -> Result<Command, ParseError> {
    match head {
        "look" => {
            let direction = parse_optional_direction(args)?;
            Ok(Command::Look { direction })
        }
        "go" => {
            let direction = Direction::parse(args).ok_or_else(|| ParseError::BadArguments {
                field: "direction",
                reason: "must be one of north, south, east, west, up, down".into(),
            })?;
            Ok(Command::Go { direction })
        }
        "say" => Ok(Command::Say { message: injection::screen_with_length(args, 500)? }),
        "local" => Ok(Command::Local { message: injection::screen_with_length(args, 500)? }),
        "global" => Ok(Command::Global { message: injection::screen_with_length(args, 500)? }),
        "system" => Ok(Command::System { message: injection::screen_with_length(args, 2000)? }),
        "emote" => Ok(Command::Emote { action: injection::screen_with_length(args, 200)? }),
        "me" => Ok(Command::Me { action: injection::screen_with_length(args, 200)? }),
        "pose" => Ok(Command::Pose { pose: injection::screen_with_length(args, 100)? }),
        "whisper" => {
            let (target, message) = split_target_and_text(args)?;
            Ok(Command::Whisper { target_player: validate_player_name(target)?, message: injection::screen_with_length(message, 2000)? })
        }
        "reply" => Ok(Command::Reply { message: injection::screen_with_length(args, 2000)? }),
        "alias" => {
            let (name, body) = split_target_and_text(args)?;
            Ok(Command::Alias { name: name.to_string(), command: body.to_string() })
        }
        "aliases" => Ok(Command::Aliases),
        "unalias" => Ok(Command::Unalias { name: first_word(args)?.to_string() }),
        "help" => Ok(Command::Help { topic: optional_first_word(args) }),
        "mute" => {
            let (target, rest) = split_target_and_text(args)?;
            let duration = if rest.is_empty() { None } else { validate_duration(rest)? };
            Ok(Command::Mute { target_player: validate_player_name(target)?, duration_minutes: duration })
        }
        "unmute" => Ok(Command::Unmute { target_player: validate_player_name(first_word(args)?)? }),
        "mute_global" => {
            let (target, rest) = split_target_and_text(args)?;
            let duration = if rest.is_empty() { None } else { validate_duration(rest)? };
            Ok(Command::MuteGlobal { target_player: validate_player_name(target)?, duration_minutes: duration })
        }
        "unmute_global" => Ok(Command::UnmuteGlobal { target_player: validate_player_name(first_word(args)?)? }),
        "mutes" => Ok(Command::Mutes),
        "add_admin" => Ok(Command::AddAdmin { target_player: validate_player_name(first_word(args)?)? }),
        "teleport" => Ok(Command::Teleport { target_player: validate_player_name(first_word(args)?)? }),
        "goto" => Ok(Command::Goto { target_player: validate_player_name(first_word(args)?)? }),
        "who" => Ok(Command::Who),
        "status" => Ok(Command::Status),
        "inventory" => Ok(Command::Inventory),
        "rest" => {
            let duration = optional_first_word(args).map(|word| validate_rest_seconds(&word)).transpose()?;
            Ok(Command::Rest { duration_seconds: duration })
        }
        "quit" => Ok(Command::Quit),
        other => Ok(Command::Other { head: other.to_string(), args: args.split_whitespace().map(str::to_string).collect() }),
    }
}

fn parse_optional_direction(args: &str) -> Result<Option<Direction>, ParseError> {
    if args.is_empty() {
        return Ok(None);
    }
    Direction::parse(args).map(Some).ok_or_else(|| ParseError::BadArguments {
        field: "direction",
        reason: "must be one of north, south, east, west, up, down".into(),
    })
}

fn first_word(args: &str) -> Result<&str, ParseError> {
    args.split_whitespace().next().ok_or(ParseError::BadArguments {
        field: "name",
        reason: "must not be empty".into(),
    })
}

fn optional_first_word(args: &str) -> Option<String> {
    args.split_whitespace().next().map(str::to_string)
}

fn split_target_and_text(args: &str) -> Result<(&str, &str), ParseError> {
    let mut parts = args.splitn(2, ' ');
    let target = parts.next().filter(|s| !s.is_empty()).ok_or(ParseError::BadArguments {
        field: "target",
        reason: "must not be empty".into(),
    })?;
    let rest = parts.next().unwrap_or("").trim();
    Ok((target, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCollaborators;
    impl ParserCollaborators for NoCollaborators {
        fn is_known_alias(&self, _head: &str) -> bool {
            false
        }
        fn is_known_emote(&self, head: &str) -> bool {
            head == "dance"
        }
    }

    struct WithAlias;
    impl ParserCollaborators for WithAlias {
        fn is_known_alias(&self, head: &str) -> bool {
            head == "a"
        }
        fn is_known_emote(&self, _head: &str) -> bool {
            false
        }
    }

    #[test]
    fn parses_go_direction() {
        let parsed = parse("go north", &NoCollaborators).unwrap();
        assert_eq!(parsed, ParsedLine::Command(Command::Go { direction: Direction::North }));
    }

    #[test]
    fn resolves_short_aliases() {
        let parsed = parse("l hi there", &NoCollaborators).unwrap();
        assert_eq!(parsed, ParsedLine::Command(Command::Local { message: "hi there".into() }));
    }

    #[test]
    fn rejects_unknown_command() {
        assert_eq!(parse("frobnicate", &NoCollaborators), Err(ParseError::UnknownCommand));
    }

    #[test]
    fn predefined_emote_without_prefix() {
        let parsed = parse("dance", &NoCollaborators).unwrap();
        assert_eq!(parsed, ParsedLine::Command(Command::Emote { action: "dance".into() }));
    }

    #[test]
    fn unregistered_alias_head_becomes_invocation() {
        let parsed = parse("a trailing args", &WithAlias).unwrap();
        assert_eq!(parsed, ParsedLine::AliasInvocation { name: "a".into(), trailing: "trailing args".into() });
    }

    #[test]
    fn say_blocks_injection() {
        let err = parse("say Hello; rm -rf /", &NoCollaborators).unwrap_err();
        assert!(matches!(err, ParseError::InjectionBlocked(_)));
    }

    #[test]
    fn empty_command_rejected() {
        assert_eq!(parse("", &NoCollaborators), Err(ParseError::EmptyCommand));
    }

    #[test]
    fn mute_duration_bounds() {
        assert!(parse("mute bob 10080", &NoCollaborators).is_ok());
        assert!(parse("mute bob 10081", &NoCollaborators).is_err());
    }

    #[test]
    fn rest_defaults_to_no_explicit_duration() {
        let parsed = parse("rest", &NoCollaborators).unwrap();
        assert_eq!(parsed, ParsedLine::Command(Command::Rest { duration_seconds: None }));
    }

    #[test]
    fn rest_rejects_out_of_range_duration() {
        let err = parse("rest 3601", &NoCollaborators).unwrap_err();
        assert!(matches!(err, ParseError::BadArguments { field: "duration_seconds", .. }));
    }

    #[test]
    fn player_name_validated() {
        let err = parse("teleport 1bob", &NoCollaborators).unwrap_err();
        assert!(matches!(err, ParseError::BadArguments { field: "player_name", .. }));
    }
}
