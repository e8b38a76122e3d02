//! Error types for the moderation subsystem

use thiserror::Error;

use super::ActionKind;

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The action was refused before any mutation took place. The message
    /// is user-facing and carries no internal detail.
    #[error("{0}")]
    Refused(String),

    /// The platform call failed; the compensating delete has already run.
    #[error("failed to {action} <@{target_id}>")]
    PlatformFailed {
        /// What was being attempted
        action: ActionKind,
        /// The target user
        target_id: u64,
    },

    /// Infraction record not found
    #[error("infraction not found: {0}")]
    NotFound(String),

    /// Persistence error surfaced from the data layer
    #[error("failed to persist moderation data: {0}")]
    Persistence(String),

    /// Generic error
    #[error("moderation error: {0}")]
    Other(String),
}

impl ModerationError {
    /// Build a refusal with a user-facing message.
    pub fn refused(message: impl Into<String>) -> Self {
        Self::Refused(message.into())
    }
}

impl From<String> for ModerationError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ModerationError::refused("you cannot warn yourself");
        assert_eq!(error.to_string(), "you cannot warn yourself");

        let error = ModerationError::PlatformFailed {
            action: ActionKind::Ban,
            target_id: 42,
        };
        assert_eq!(error.to_string(), "failed to ban <@42>");

        let error = ModerationError::NotFound("abc123".to_string());
        assert_eq!(error.to_string(), "infraction not found: abc123");

        let error = ModerationError::from("channel closed".to_string());
        assert_eq!(error.to_string(), "moderation error: channel closed");
    }
}
