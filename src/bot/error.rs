//! Error taxonomy for group state, ledgers and commands.

use std::fmt;

/// Errors surfaced by bot operations.
///
/// `Parse` and `Validation` are meant for the end user and get replied into
/// the chat verbatim. `Store` and `Provider` are logged.
#[derive(Debug)]
pub enum BotError {
    /// KV read/write failure or a corrupt stored blob.
    Store(String),
    /// Chat provider or third-party API failure.
    Provider(String),
    /// Unparseable date/time input.
    Parse(String),
    /// Missing or conflicting user input.
    Validation(String),
}

impl BotError {
    /// True for errors that should be shown to the user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Validation(_))
    }

    /// Text suitable for a chat reply.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Parse(msg) | Self::Validation(msg) => msg,
            Self::Store(_) | Self::Provider(_) => "Something went wrong, try again later.",
        }
    }
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(msg) => write!(f, "store error: {}", msg),
            Self::Provider(msg) => write!(f, "provider error: {}", msg),
            Self::Parse(msg) => write!(f, "parse error: {}", msg),
            Self::Validation(msg) => write!(f, "validation error: {}", msg),
        }
    }
}

impl std::error::Error for BotError {}

impl From<rusqlite::Error> for BotError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("bad stored JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_variants() {
        assert!(BotError::Parse("x".into()).is_user_facing());
        assert!(BotError::Validation("x".into()).is_user_facing());
        assert!(!BotError::Store("x".into()).is_user_facing());
        assert!(!BotError::Provider("x".into()).is_user_facing());
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = BotError::Store("disk on fire".into());
        assert!(!err.user_message().contains("disk"));
        assert!(err.to_string().contains("disk on fire"));
    }
}
