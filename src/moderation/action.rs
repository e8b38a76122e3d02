//! Moderation action kinds and duration bounds
//!
//! This module defines the vocabulary shared by the orchestrator, the
//! reconciliation sweep, and the audit observer: what kind of action was
//! taken, which reversal class (if any) it schedules, and how long a timed
//! action may last.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lower bound for a mute duration, in milliseconds.
pub const MUTE_MIN_MS: i64 = 1_000;
/// Upper bound for a mute duration: 28 days, the platform timeout ceiling.
pub const MUTE_MAX_MS: i64 = 28 * 24 * 60 * 60 * 1_000;
/// Upper bound for a timed ban: 365 days.
pub const BAN_MAX_MS: i64 = 365 * 24 * 60 * 60 * 1_000;
/// Upper bound for the optional delete-recent-messages window on bans.
pub const MAX_DELETE_MESSAGE_SECONDS: u32 = 7 * 24 * 60 * 60;

/// Reason recorded when a moderator supplies none.
pub const NO_REASON: &str = "no reason provided";

/// Kind of moderation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Database-only warning, no platform side effect
    Warn,
    /// Communication timeout
    Mute,
    /// Server kick
    Kick,
    /// Server ban
    Ban,
    /// Clears a timeout
    Unmute,
    /// Clears a ban
    Unban,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warn => write!(f, "warn"),
            Self::Mute => write!(f, "mute"),
            Self::Kick => write!(f, "kick"),
            Self::Ban => write!(f, "ban"),
            Self::Unmute => write!(f, "unmute"),
            Self::Unban => write!(f, "unban"),
        }
    }
}

impl ActionKind {
    /// The reversal class a *timed* instance of this action schedules.
    #[must_use]
    pub fn reversal_class(self) -> Option<ReversalClass> {
        match self {
            Self::Mute => Some(ReversalClass::Mute),
            Self::Ban => Some(ReversalClass::Ban),
            Self::Warn | Self::Kick | Self::Unmute | Self::Unban => None,
        }
    }

    /// The reversal class this action *clears*, for manual unmute/unban.
    #[must_use]
    pub fn clears_class(self) -> Option<ReversalClass> {
        match self {
            Self::Unmute => Some(ReversalClass::Mute),
            Self::Unban => Some(ReversalClass::Ban),
            _ => None,
        }
    }

    /// Whether this action undoes a prior punishment.
    #[must_use]
    pub fn is_reversal(self) -> bool {
        matches!(self, Self::Unmute | Self::Unban)
    }

    /// Whether issuing this action requires outranking the target.
    #[must_use]
    pub fn hierarchy_sensitive(self) -> bool {
        // Unban targets a user who is no longer a member; there is no rank
        // to compare against.
        !matches!(self, Self::Unban)
    }
}

/// Class of punishment a pending task reverses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReversalClass {
    /// Reversed by an unmute
    Mute,
    /// Reversed by an unban
    Ban,
}

impl fmt::Display for ReversalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mute => write!(f, "mute"),
            Self::Ban => write!(f, "ban"),
        }
    }
}

/// Origin marker on an infraction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InfractionFlag {
    /// Issued through a bot command
    #[default]
    Default,
    /// Synthesized by the reconciliation sweep
    Automatic,
    /// Observed from a platform-native moderation action
    Native,
    /// Issued through a quick-action shortcut
    Quick,
}

/// The caller's resolved intent for an action's duration.
///
/// Commands map the raw option through the sentinel check and the duration
/// parser before the orchestrator ever sees it, so "no duration supplied"
/// and "explicitly permanent" stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSpec {
    /// No duration option was supplied
    Unspecified,
    /// A permanent-duration sentinel was supplied
    Permanent,
    /// An explicit duration, in milliseconds
    Millis(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversal_classes() {
        assert_eq!(ActionKind::Mute.reversal_class(), Some(ReversalClass::Mute));
        assert_eq!(ActionKind::Ban.reversal_class(), Some(ReversalClass::Ban));
        assert_eq!(ActionKind::Warn.reversal_class(), None);
        assert_eq!(ActionKind::Kick.reversal_class(), None);
        assert_eq!(ActionKind::Unmute.reversal_class(), None);
        assert_eq!(ActionKind::Unban.reversal_class(), None);
    }

    #[test]
    fn test_clears_class() {
        assert_eq!(ActionKind::Unmute.clears_class(), Some(ReversalClass::Mute));
        assert_eq!(ActionKind::Unban.clears_class(), Some(ReversalClass::Ban));
        assert_eq!(ActionKind::Mute.clears_class(), None);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(MUTE_MAX_MS, 2_419_200_000);
        assert_eq!(MAX_DELETE_MESSAGE_SECONDS, 604_800);
        assert!(MUTE_MIN_MS < MUTE_MAX_MS);
        assert!(MUTE_MAX_MS < BAN_MAX_MS);
    }

    #[test]
    fn test_hierarchy_sensitivity() {
        assert!(ActionKind::Mute.hierarchy_sensitive());
        assert!(ActionKind::Warn.hierarchy_sensitive());
        assert!(!ActionKind::Unban.hierarchy_sensitive());
    }
}
