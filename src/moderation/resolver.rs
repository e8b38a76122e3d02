//! Punishment resolver and the ports it sits on
//!
//! [`PlatformActionPort`] is the only boundary through which the core
//! touches the chat platform. [`PunishmentResolver`] wraps it and converts
//! platform errors into an explicit [`ResolveOutcome`], so callers sequence
//! persistence around a tagged result instead of scattered failure flags.
//! No store writes happen in this module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use super::ActionKind;
use crate::data::GuildConfig;

/// Error surfaced by a platform port call
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PortError(pub String);

impl PortError {
    /// Build a port error from any displayable source.
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Platform-level moderation effects.
///
/// `unmute` and `unban` on an already-clear target are no-op successes at
/// this seam; the reversal sweep relies on that.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformActionPort: Send + Sync {
    /// Time out a member. Duration is pre-validated by the caller.
    async fn mute(
        &self,
        guild_id: u64,
        target_id: u64,
        duration_ms: i64,
        reason: &str,
    ) -> Result<(), PortError>;

    /// Clear a member's timeout.
    async fn unmute(&self, guild_id: u64, target_id: u64, reason: &str) -> Result<(), PortError>;

    /// Ban a user, optionally deleting their recent messages.
    async fn ban(
        &self,
        guild_id: u64,
        target_id: u64,
        reason: &str,
        delete_message_seconds: Option<u32>,
    ) -> Result<(), PortError>;

    /// Remove a ban.
    async fn unban(&self, guild_id: u64, target_id: u64, reason: &str) -> Result<(), PortError>;

    /// Kick a member.
    async fn kick(&self, guild_id: u64, target_id: u64, reason: &str) -> Result<(), PortError>;

    /// The member's current timeout expiry, `None` when not timed out.
    async fn current_mute_expiry(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> Result<Option<DateTime<Utc>>, PortError>;

    /// Whether the user currently appears on the guild's ban list.
    async fn is_banned(&self, guild_id: u64, target_id: u64) -> Result<bool, PortError>;

    /// Whether the guild is still reachable at all (bot not removed).
    async fn guild_reachable(&self, guild_id: u64) -> bool;

    /// Whether the bot holds the permission needed to reverse bans.
    async fn can_unban(&self, guild_id: u64) -> bool;
}

/// Best-effort delivery of notifications and log entries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// DM the target. Returns whether delivery succeeded.
    async fn notify_target(&self, target_id: u64, message: &str) -> bool;

    /// Post a rendered entry to the guild's moderation log.
    async fn log(&self, config: &GuildConfig, entry: &str);
}

/// Permission predicate consulted during validation.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionGate: Send + Sync {
    /// Whether the executor may perform this kind of action.
    fn allows(
        &self,
        config: &GuildConfig,
        executor_roles: &[u64],
        executor_is_admin: bool,
        kind: ActionKind,
    ) -> bool;
}

/// Outcome of a punishment application attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The platform mutation took effect
    Applied,
    /// The platform mutation failed; `detail` is best-effort diagnostics
    Failed {
        /// Internal error detail, never shown to users
        detail: String,
    },
}

impl ResolveOutcome {
    /// Whether the punishment was applied.
    #[must_use]
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Applies moderation actions at the platform, failing softly.
#[derive(Clone)]
pub struct PunishmentResolver {
    platform: Arc<dyn PlatformActionPort>,
}

impl PunishmentResolver {
    /// Create a resolver over a platform port.
    pub fn new(platform: Arc<dyn PlatformActionPort>) -> Self {
        Self { platform }
    }

    /// Perform exactly one platform mutation attempt for the action.
    ///
    /// Input is assumed pre-validated by the orchestrator (duration bounds,
    /// hierarchy, permissions). Warn has no platform side effect at all.
    pub async fn resolve(
        &self,
        kind: ActionKind,
        guild_id: u64,
        target_id: u64,
        reason: &str,
        duration_ms: Option<i64>,
        delete_message_seconds: Option<u32>,
    ) -> ResolveOutcome {
        let result = match kind {
            ActionKind::Warn => Ok(()),
            ActionKind::Mute => match duration_ms {
                Some(duration_ms) => {
                    self.platform
                        .mute(guild_id, target_id, duration_ms, reason)
                        .await
                }
                None => Err(PortError::new("mute invoked without a duration")),
            },
            ActionKind::Kick => self.platform.kick(guild_id, target_id, reason).await,
            ActionKind::Ban => {
                self.platform
                    .ban(guild_id, target_id, reason, delete_message_seconds)
                    .await
            }
            ActionKind::Unmute => self.platform.unmute(guild_id, target_id, reason).await,
            ActionKind::Unban => self.platform.unban(guild_id, target_id, reason).await,
        };

        match result {
            Ok(()) => ResolveOutcome::Applied,
            Err(e) => {
                warn!(
                    %kind,
                    guild_id,
                    target_id,
                    error = %e,
                    "platform call failed"
                );
                ResolveOutcome::Failed {
                    detail: e.to_string(),
                }
            }
        }
    }
}
