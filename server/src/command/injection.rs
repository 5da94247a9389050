//! Free-text injection screen (spec §4.2 step 4, "Free-text fields").
//!
//! Grounded on `server/models/command.py`'s per-field `dangerous_chars` +
//! `injection_patterns` checks and `server/validators/command_validator.py`'s
//! `is_suspicious_input`.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

const DANGEROUS_CHARS: &[char] = &['<', '>', '&', '"', '\'', ';', '|', '`', '$', '(', ')'];

static SQL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(and|or)\s*=\s*['"]?\w+"#).unwrap());
static CODE_EXEC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)__import__\(|eval\(|exec\(|system\(|os\.").unwrap());
static FORMAT_STRING_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%[a-zA-Z]").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InjectionError {
    #[error("message contains invalid characters: {0:?}")]
    DangerousChars(Vec<char>),
    #[error("message contains a suspicious pattern")]
    SuspiciousPattern,
}

/// Screens a free-text field per spec §4.2. Returns the trimmed text on success.
pub fn screen(text: &str) -> Result<String, InjectionError> {
    let found: Vec<char> = DANGEROUS_CHARS.iter().copied().filter(|c| text.contains(*c)).collect();
    if !found.is_empty() {
        return Err(InjectionError::DangerousChars(found));
    }

    if SQL_PATTERN.is_match(text) || CODE_EXEC_PATTERN.is_match(text) || FORMAT_STRING_PATTERN.is_match(text) {
        return Err(InjectionError::SuspiciousPattern);
    }

    Ok(text.trim().to_string())
}

/// Length-bounded variant used by parser constructors that enforce a
/// per-variant max length (spec §4.2 step 4).
pub fn screen_with_length(text: &str, max_len: usize) -> Result<String, FieldError> {
    if text.is_empty() {
        return Err(FieldError::Empty);
    }
    if text.len() > max_len {
        return Err(FieldError::TooLong { max: max_len });
    }
    screen(text).map_err(FieldError::Injection)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("field must not be empty")]
    Empty,
    #[error("field exceeds the maximum length of {max}")]
    TooLong { max: usize },
    #[error(transparent)]
    Injection(#[from] InjectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dangerous_characters() {
        let err = screen("Hello; rm -rf /").unwrap_err();
        assert!(matches!(err, InjectionError::DangerousChars(ref chars) if chars.contains(&';')));
    }

    #[test]
    fn rejects_sql_pattern() {
        assert_eq!(screen("1 or = 1"), Err(InjectionError::SuspiciousPattern));
    }

    #[test]
    fn rejects_code_exec_pattern() {
        assert_eq!(screen("please run os.remove now"), Err(InjectionError::SuspiciousPattern));
    }

    #[test]
    fn accepts_plain_text() {
        assert_eq!(screen("hello there").unwrap(), "hello there");
    }

    #[test]
    fn length_bound_rejects_over_cap() {
        let text = "a".repeat(501);
        assert_eq!(screen_with_length(&text, 500), Err(FieldError::TooLong { max: 500 }));
    }
}
