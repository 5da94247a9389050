//! Environment-derived configuration (spec §4.9, §6).
//!
//! Grounded on the teacher's `main.rs`, which reads its listen address and
//! config path inline; generalized here into a single loaded-once struct so
//! the lifecycle orchestrator has one fallible step instead of scattered
//! `env::var` calls.

use std::time::Duration;

use thiserror::Error;

use crate::command::normalize::DEFAULT_MAX_RAW_LENGTH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable `{0}` is not set")]
    MissingRequired(&'static str),
    #[error("environment variable `{name}` has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `{playerName}_aliases.json` records. Required;
    /// its absence is a fatal startup error (spec §6).
    pub aliases_dir: std::path::PathBuf,
    pub listen_addr: String,
    pub tick_interval: Duration,
    pub command_max_length: usize,
    pub rest_countdown_seconds: u64,
    pub disconnect_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let aliases_dir = required("ALIASES_DIR")?.into();
        let listen_addr = optional("LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let tick_interval = Duration::from_millis(parse_optional("TICK_INTERVAL_MS", 1000)?);
        let command_max_length = parse_optional("COMMAND_MAX_LENGTH", DEFAULT_MAX_RAW_LENGTH as u64)? as usize;
        let rest_countdown_seconds = parse_optional("REST_COUNTDOWN_SECONDS", 10)?;
        let disconnect_grace = Duration::from_millis(parse_optional("DISCONNECT_GRACE_MS", 30_000)?);

        Ok(Self { aliases_dir, listen_addr, tick_interval, command_max_length, rest_countdown_seconds, disconnect_grace })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingRequired(name))
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_optional<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, reason: "not a valid integer".into() }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_aliases_dir_is_fatal() {
        // SAFETY: tests run single-threaded within this module's scope for this var.
        unsafe { std::env::remove_var("ALIASES_DIR") };
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("ALIASES_DIR")));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        unsafe {
            std::env::set_var("ALIASES_DIR", "/tmp/mythosmud-aliases-test");
            std::env::remove_var("TICK_INTERVAL_MS");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        unsafe { std::env::remove_var("ALIASES_DIR") };
    }
}
