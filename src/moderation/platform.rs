//! Discord-backed implementations of the moderation ports

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    ChannelId, GuildId, Http, RoleId, Timestamp, UserId, builder::EditMember,
};
use std::sync::Arc;
use tracing::warn;

use super::{ActionKind, NotificationPort, PermissionGate, PlatformActionPort, PortError};
use crate::data::GuildConfig;

/// Whether the API call failed because the resource does not exist.
fn is_not_found(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp))
            if resp.status_code.as_u16() == 404
    )
}

fn api_error(err: serenity::Error) -> PortError {
    PortError::new(err.to_string())
}

/// [`PlatformActionPort`] over the Discord HTTP API.
///
/// Mutes map to native timeouts, bans delete messages in whole days, and
/// reversals tolerate the target already being clear.
pub struct DiscordActionPort {
    http: Arc<Http>,
}

impl DiscordActionPort {
    /// Create a port over an HTTP client.
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PlatformActionPort for DiscordActionPort {
    async fn mute(
        &self,
        guild_id: u64,
        target_id: u64,
        duration_ms: i64,
        reason: &str,
    ) -> Result<(), PortError> {
        let until = Utc::now() + chrono::Duration::milliseconds(duration_ms);
        let timestamp = Timestamp::from_unix_timestamp(until.timestamp())
            .map_err(|e| PortError::new(format!("invalid timeout instant: {e}")))?;

        GuildId::new(guild_id)
            .edit_member(
                &*self.http,
                UserId::new(target_id),
                EditMember::new()
                    .disable_communication_until_datetime(timestamp)
                    .audit_log_reason(reason),
            )
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn unmute(&self, guild_id: u64, target_id: u64, reason: &str) -> Result<(), PortError> {
        let result = GuildId::new(guild_id)
            .edit_member(
                &*self.http,
                UserId::new(target_id),
                EditMember::new()
                    .enable_communication()
                    .audit_log_reason(reason),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // Member left the guild; there is no timeout left to clear.
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn ban(
        &self,
        guild_id: u64,
        target_id: u64,
        reason: &str,
        delete_message_seconds: Option<u32>,
    ) -> Result<(), PortError> {
        // The ban endpoint takes whole days; round the window up.
        let delete_days = delete_message_seconds
            .map_or(0, |secs| secs.div_ceil(86_400))
            .min(7) as u8;

        GuildId::new(guild_id)
            .ban_with_reason(&*self.http, UserId::new(target_id), delete_days, reason)
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn unban(&self, guild_id: u64, target_id: u64, _reason: &str) -> Result<(), PortError> {
        match GuildId::new(guild_id)
            .unban(&*self.http, UserId::new(target_id))
            .await
        {
            Ok(()) => Ok(()),
            // Already unbanned; the desired state holds.
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn kick(&self, guild_id: u64, target_id: u64, reason: &str) -> Result<(), PortError> {
        GuildId::new(guild_id)
            .kick_with_reason(&*self.http, UserId::new(target_id), reason)
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn current_mute_expiry(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> Result<Option<DateTime<Utc>>, PortError> {
        match GuildId::new(guild_id)
            .member(&*self.http, UserId::new(target_id))
            .await
        {
            Ok(member) => Ok(member
                .communication_disabled_until
                .and_then(|ts| DateTime::from_timestamp(ts.unix_timestamp(), 0))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn is_banned(&self, guild_id: u64, target_id: u64) -> Result<bool, PortError> {
        match self
            .http
            .get_ban(GuildId::new(guild_id), UserId::new(target_id))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn guild_reachable(&self, guild_id: u64) -> bool {
        GuildId::new(guild_id)
            .to_partial_guild(&*self.http)
            .await
            .is_ok()
    }

    async fn can_unban(&self, guild_id: u64) -> bool {
        let guild_id = GuildId::new(guild_id);
        let Ok(bot) = self.http.get_current_user().await else {
            return false;
        };
        let Ok(guild) = guild_id.to_partial_guild(&*self.http).await else {
            return false;
        };
        let Ok(member) = guild.member(&*self.http, bot.id).await else {
            return false;
        };

        // Fold the @everyone role with the bot's own roles.
        let mut permissions = guild
            .roles
            .get(&RoleId::new(guild_id.get()))
            .map(|role| role.permissions)
            .unwrap_or_default();
        for role_id in &member.roles {
            if let Some(role) = guild.roles.get(role_id) {
                permissions |= role.permissions;
            }
        }
        permissions.administrator() || permissions.ban_members()
    }
}

/// [`NotificationPort`] over Discord DMs and the configured log channel.
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    /// Create a notifier over an HTTP client.
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationPort for DiscordNotifier {
    async fn notify_target(&self, target_id: u64, message: &str) -> bool {
        match UserId::new(target_id).create_dm_channel(&*self.http).await {
            Ok(channel) => channel.id.say(&*self.http, message).await.is_ok(),
            // DMs closed or user unreachable
            Err(_) => false,
        }
    }

    async fn log(&self, config: &GuildConfig, entry: &str) {
        let Some(channel_id) = config.log_channel_id else {
            return;
        };
        if let Err(e) = ChannelId::new(channel_id).say(&*self.http, entry).await {
            warn!(
                guild_id = config.guild_id,
                channel_id,
                error = %e,
                "failed to post to the moderation log channel"
            );
        }
    }
}

/// [`PermissionGate`] backed by the guild's configured moderator role.
///
/// Administrators always pass; everyone else needs the configured role. A
/// guild without a moderator role restricts moderation to administrators.
pub struct ModRoleGate;

impl PermissionGate for ModRoleGate {
    fn allows(
        &self,
        config: &GuildConfig,
        executor_roles: &[u64],
        executor_is_admin: bool,
        _kind: ActionKind,
    ) -> bool {
        if executor_is_admin {
            return true;
        }
        config
            .mod_role_id
            .is_some_and(|role_id| executor_roles.contains(&role_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_always_passes_the_gate() {
        let config = GuildConfig::default();
        assert!(ModRoleGate.allows(&config, &[], true, ActionKind::Ban));
    }

    #[test]
    fn test_mod_role_grants_access() {
        let config = GuildConfig {
            mod_role_id: Some(42),
            ..GuildConfig::default()
        };
        assert!(ModRoleGate.allows(&config, &[7, 42], false, ActionKind::Mute));
        assert!(!ModRoleGate.allows(&config, &[7], false, ActionKind::Mute));
    }

    #[test]
    fn test_no_mod_role_restricts_to_admins() {
        let config = GuildConfig::default();
        assert!(!ModRoleGate.allows(&config, &[1, 2, 3], false, ActionKind::Warn));
    }
}
