use poise::serenity_prelude::{
    self as serenity, AuditLogEntry, Change, Context, EventHandler, GuildId, MemberAction, Ready,
};
use serenity::model::guild::audit_log::Action;
use tracing::{info, warn};

use crate::EVENT_TARGET;
use crate::moderation::{AuditEvent, AuditEventKind, ExternalActionObserver};

/// Gateway event handler; forwards audit-log entries to the observer.
pub struct Handler {
    observer: ExternalActionObserver,
}

impl Handler {
    /// Create a handler around an observer.
    pub fn new(observer: ExternalActionObserver) -> Self {
        Self { observer }
    }
}

/// Translate an audit-log entry into an observable moderation event.
///
/// Entries for anything other than kicks, bans, unbans, and timeout changes
/// map to `None` and are ignored.
fn map_audit_entry(entry: &AuditLogEntry, guild_id: u64) -> Option<AuditEvent> {
    let target_id = entry.target_id?.get();
    let kind = match &entry.action {
        Action::Member(MemberAction::Kick) => AuditEventKind::Kick,
        Action::Member(MemberAction::BanAdd) => AuditEventKind::BanAdd,
        Action::Member(MemberAction::BanRemove) => AuditEventKind::BanRemove,
        Action::Member(MemberAction::Update) => {
            let new_timeout = entry.changes.as_ref()?.iter().find_map(|change| match change {
                Change::CommunicationDisabledUntil { new, .. } => Some(*new),
                _ => None,
            })?;
            match new_timeout {
                Some(until) => AuditEventKind::TimeoutSet {
                    until: chrono::DateTime::from_timestamp(until.unix_timestamp(), 0)?,
                },
                None => AuditEventKind::TimeoutCleared,
            }
        }
        _ => return None,
    };

    Some(AuditEvent {
        guild_id,
        executor_id: entry.user_id.get(),
        target_id,
        kind,
        reason: entry.reason.clone(),
    })
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// Moderation performed outside the bot surfaces here.
    async fn guild_audit_log_entry_create(
        &self,
        _ctx: Context,
        entry: AuditLogEntry,
        guild_id: GuildId,
    ) {
        let Some(event) = map_audit_entry(&entry, guild_id.get()) else {
            return;
        };
        info!(
            target: EVENT_TARGET,
            guild_id = event.guild_id,
            executor_id = event.executor_id,
            target_id = event.target_id,
            kind = ?event.kind,
            "observed moderation audit entry"
        );
        self.observer.observe(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Since we can't easily construct Context or AuditLogEntry objects due to
    // their complex structure, we verify what we can at compile time.
    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }
}
