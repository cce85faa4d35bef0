//! Shared identifier rules for stored entities

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length for entity identifiers
pub const MAX_ID_LENGTH: usize = 128;

/// Identifiers are alphanumeric with hyphens and underscores
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Validate an identifier, naming the entity kind in the message
pub fn validate_identifier(kind: &str, id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} ID cannot be empty", kind));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(format!(
            "{} ID exceeds maximum length of {} characters",
            kind, MAX_ID_LENGTH
        ));
    }

    if !ID_PATTERN.is_match(id) {
        return Err(format!(
            "Invalid {} ID '{}': only letters, digits, '-' and '_' are allowed",
            kind.to_lowercase(),
            id
        ));
    }

    Ok(())
}
