//! Alias data model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ALIAS_NAME_MAX_LEN: usize = 20;
pub const ALIAS_BODY_MAX_LEN: usize = 200;
pub const ALIAS_BUNDLE_MAX_LEN: usize = 50;

const RESERVED_NAMES: &[&str] = &["alias", "aliases", "unalias", "help"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AliasValidationError {
    #[error("alias name must be 1-{ALIAS_NAME_MAX_LEN} characters")]
    NameLength,
    #[error("alias name must match ^[A-Za-z][A-Za-z0-9_]*$")]
    NameShape,
    #[error("`{0}` is a reserved alias name")]
    ReservedName(String),
    #[error("alias body must be 1-{ALIAS_BODY_MAX_LEN} characters")]
    BodyLength,
    #[error("alias body's leading word must not be a reserved alias-management word")]
    ReservedBodyHead,
}

fn validate_name(name: &str) -> Result<(), AliasValidationError> {
    if name.is_empty() || name.len() > ALIAS_NAME_MAX_LEN {
        return Err(AliasValidationError::NameLength);
    }
    let shape_ok = name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !shape_ok {
        return Err(AliasValidationError::NameShape);
    }
    if RESERVED_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(AliasValidationError::ReservedName(name.to_string()));
    }
    Ok(())
}

fn validate_body(body: &str) -> Result<(), AliasValidationError> {
    if body.is_empty() || body.len() > ALIAS_BODY_MAX_LEN {
        return Err(AliasValidationError::BodyLength);
    }
    let head = body.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
    if RESERVED_NAMES.contains(&head.as_str()) {
        return Err(AliasValidationError::ReservedBodyHead);
    }
    Ok(())
}

/// A single alias: `{name, body, createdAt, updatedAt}` (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    #[serde(rename = "command")]
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alias {
    pub fn new(name: impl Into<String>, body: impl Into<String>, now: DateTime<Utc>) -> Result<Self, AliasValidationError> {
        let name = name.into();
        let body = body.into();
        validate_name(&name)?;
        validate_body(&body)?;
        Ok(Self { name, body, created_at: now, updated_at: now })
    }
}

/// Per-player value `{version, aliases[]}` (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasBundle {
    pub version: String,
    pub aliases: Vec<Alias>,
}

impl AliasBundle {
    pub fn empty() -> Self {
        Self { version: "1.0".to_string(), aliases: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Alias> {
        self.aliases.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
