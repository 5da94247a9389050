//! Command input normalizer (C1, spec §4.1).
//!
//! Pure function, no suspension points, no state.

use thiserror::Error;

/// Default raw-input length cap in octets.
pub const DEFAULT_MAX_RAW_LENGTH: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("command exceeds the maximum length of {max} octets")]
    TooLong { max: usize },
}

/// `normalize(raw) -> text`, steps (a)-(f) of spec §4.1 in order.
pub fn normalize(raw: &str, max_len: usize) -> Result<String, NormalizeError> {
    if raw.len() > max_len {
        return Err(NormalizeError::TooLong { max: max_len });
    }

    let stripped = raw.strip_prefix('/').unwrap_or(raw);
    let without_ansi = strip_ansi(stripped);
    let filtered: String = without_ansi
        .chars()
        .filter(|&c| c >= '\u{20}' || c == '\t' || c == '\n')
        .collect();

    let collapsed = collapse_whitespace(&filtered);
    Ok(collapsed.trim().to_string())
}

/// Removes ANSI CSI escape sequences (`ESC [ ... final-byte`).
fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for c in input.chars() {
        let is_space = c == ' ' || c == '\t' || c == '\n';
        if is_space {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}
