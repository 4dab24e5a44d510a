//! Identifier generation and normalisation.

use crate::error::{Result, TdError};

pub const ISSUE_PREFIX: &str = "td-";
pub const LOG_PREFIX: &str = "lg-";
pub const HANDOFF_PREFIX: &str = "ho-";
pub const COMMENT_PREFIX: &str = "cm-";
pub const BOARD_PREFIX: &str = "bd-";
pub const NOTE_PREFIX: &str = "nt-";
pub const WORK_SESSION_PREFIX: &str = "ws-";
pub const SNAPSHOT_PREFIX: &str = "gs-";

/// Number of hex characters in an issue id suffix.
pub const ISSUE_HEX_LEN: usize = 6;

/// Number of attempts before giving up on a colliding issue id.
pub const MAX_ID_ATTEMPTS: usize = 10;

/// Random lowercase hex string of `len` characters.
#[must_use]
pub fn random_hex(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let word: u32 = rand::random();
        out.push_str(&format!("{word:08x}"));
    }
    out.truncate(len);
    out
}

/// Fresh issue id candidate (`td-` + 6 hex).
#[must_use]
pub fn new_issue_id() -> String {
    format!("{ISSUE_PREFIX}{}", random_hex(ISSUE_HEX_LEN))
}

/// Fresh id for a secondary entity. Eight hex chars keep collisions negligible
/// across devices without a retry loop.
#[must_use]
pub fn new_child_id(prefix: &str) -> String {
    format!("{prefix}{}", random_hex(8))
}

/// Normalise a user-supplied issue id.
///
/// Accepts `td-a1b2c3`, `TD-A1B2C3` and the bare `a1b2c3` form.
///
/// # Errors
///
/// Returns `InvalidInput` when the input is empty or contains characters that
/// can never appear in an id.
pub fn normalize_issue_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err(TdError::invalid("issue id must not be empty"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TdError::invalid(format!("invalid issue id '{raw}'")));
    }
    if trimmed.starts_with(ISSUE_PREFIX) {
        Ok(trimmed)
    } else if trimmed.contains('-') {
        // Foreign prefixes (imported ids) are kept verbatim.
        Ok(trimmed)
    } else {
        Ok(format!("{ISSUE_PREFIX}{trimmed}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_ids_have_expected_shape() {
        for _ in 0..50 {
            let id = new_issue_id();
            assert!(id.starts_with("td-"));
            assert_eq!(id.len(), 3 + ISSUE_HEX_LEN);
            assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn child_ids_use_prefix() {
        let id = new_child_id(LOG_PREFIX);
        assert!(id.starts_with("lg-"));
        assert_eq!(id.len(), 11);
    }

    #[test]
    fn normalize_accepts_bare_and_prefixed() {
        assert_eq!(normalize_issue_id("a1b2c3").unwrap(), "td-a1b2c3");
        assert_eq!(normalize_issue_id("TD-A1B2C3").unwrap(), "td-a1b2c3");
        assert_eq!(normalize_issue_id("td-a1b2").unwrap(), "td-a1b2");
        assert!(normalize_issue_id("").is_err());
        assert!(normalize_issue_id("td-a1;drop").is_err());
    }
}
