//! External action observer
//!
//! Moderation performed outside the bot (right-click bans, native timeouts)
//! still reaches the stores through audit-log events. The observer keeps the
//! task store consistent with platform reality unconditionally; writing
//! history records for external actions is opt-in per guild.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    ActionKind, Infraction, InfractionFlag, InfractionStore, ReversalClass, StatePersistence,
    TaskKey, TaskStore,
};
use crate::data::GuildConfigCache;

/// What an audit-log entry says happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    /// A member was kicked
    Kick,
    /// A user was banned
    BanAdd,
    /// A ban was lifted
    BanRemove,
    /// A timeout was set or extended, ending at `until`
    TimeoutSet {
        /// When the native timeout ends
        until: DateTime<Utc>,
    },
    /// A timeout was cleared early
    TimeoutCleared,
}

/// A moderation action observed in the guild's audit log
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Guild the action happened in
    pub guild_id: u64,
    /// Who performed the action
    pub executor_id: u64,
    /// Who it was done to
    pub target_id: u64,
    /// What happened
    pub kind: AuditEventKind,
    /// Audit-log reason, if the moderator supplied one
    pub reason: Option<String>,
}

/// Feeds externally-performed moderation back into the stores.
#[derive(Clone)]
pub struct ExternalActionObserver {
    infractions: InfractionStore,
    tasks: TaskStore,
    configs: GuildConfigCache,
    persistence: Arc<dyn StatePersistence>,
    bot_id: u64,
}

impl ExternalActionObserver {
    /// Wire up an observer over the stores.
    pub fn new(
        infractions: InfractionStore,
        tasks: TaskStore,
        configs: GuildConfigCache,
        persistence: Arc<dyn StatePersistence>,
        bot_id: u64,
    ) -> Self {
        Self {
            infractions,
            tasks,
            configs,
            persistence,
            bot_id,
        }
    }

    /// Apply one observed event to the stores.
    ///
    /// Events caused by the bot itself are dropped here; the orchestrator
    /// and sweep already recorded those actions when they performed them.
    pub async fn observe(&self, event: AuditEvent) {
        if event.executor_id == self.bot_id {
            debug!(
                guild_id = event.guild_id,
                target_id = event.target_id,
                "ignoring audit entry for the bot's own action"
            );
            return;
        }

        let track_native = self.configs.get(event.guild_id).await.track_native;
        let mut mutated = false;

        match event.kind {
            AuditEventKind::BanAdd => {
                // A banned member's pending unmute is moot regardless of
                // whether this guild tracks external actions.
                mutated |= self.drop_task(&event, ReversalClass::Mute);
                if track_native {
                    self.record(&event, ActionKind::Ban, None);
                    mutated = true;
                }
            }
            AuditEventKind::BanRemove => {
                mutated |= self.drop_task(&event, ReversalClass::Ban);
                if track_native {
                    self.record(&event, ActionKind::Unban, None);
                    mutated = true;
                }
            }
            AuditEventKind::Kick => {
                if track_native {
                    self.record(&event, ActionKind::Kick, None);
                    mutated = true;
                }
            }
            AuditEventKind::TimeoutSet { until } => {
                if track_native {
                    let infraction = self.record(&event, ActionKind::Mute, Some(until));
                    self.tasks.upsert(
                        TaskKey::new(event.guild_id, event.target_id, ReversalClass::Mute),
                        infraction.id,
                        until,
                    );
                    mutated = true;
                }
            }
            AuditEventKind::TimeoutCleared => {
                mutated |= self.drop_task(&event, ReversalClass::Mute);
                if track_native {
                    self.record(&event, ActionKind::Unmute, None);
                    mutated = true;
                }
            }
        }

        if mutated {
            self.persistence.persist().await;
        }
    }

    fn drop_task(&self, event: &AuditEvent, class: ReversalClass) -> bool {
        let dropped = self
            .tasks
            .delete(TaskKey::new(event.guild_id, event.target_id, class))
            .is_some();
        if dropped {
            info!(
                guild_id = event.guild_id,
                target_id = event.target_id,
                ?class,
                "dropped reversal task superseded by an external action"
            );
        }
        dropped
    }

    fn record(
        &self,
        event: &AuditEvent,
        kind: ActionKind,
        expires_at: Option<DateTime<Utc>>,
    ) -> Infraction {
        let infraction = self.infractions.store(Infraction::new(
            event.guild_id,
            event.target_id,
            event.executor_id,
            kind,
            event.reason.clone(),
            expires_at,
            InfractionFlag::Native,
        ));
        info!(
            infraction_id = %infraction.id,
            guild_id = event.guild_id,
            target_id = event.target_id,
            executor_id = event.executor_id,
            %kind,
            "recorded externally-performed action"
        );
        infraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{GuildConfig, MockGuildConfigProvider};
    use crate::moderation::sweep::MockStatePersistence;
    use chrono::Duration;

    const GUILD: u64 = 10;
    const MOD: u64 = 50;
    const TARGET: u64 = 20;
    const BOT: u64 = 999;

    fn observer(
        track_native: bool,
        persist_calls: usize,
    ) -> (ExternalActionObserver, InfractionStore, TaskStore) {
        let mut provider = MockGuildConfigProvider::new();
        provider.expect_fetch().returning(move |guild_id| GuildConfig {
            guild_id,
            track_native,
            ..GuildConfig::default()
        });
        let mut persistence = MockStatePersistence::new();
        persistence
            .expect_persist()
            .times(persist_calls)
            .returning(|| ());

        let infractions = InfractionStore::new();
        let tasks = TaskStore::new();
        let observer = ExternalActionObserver::new(
            infractions.clone(),
            tasks.clone(),
            GuildConfigCache::new(Arc::new(provider)),
            Arc::new(persistence),
            BOT,
        );
        (observer, infractions, tasks)
    }

    fn event(kind: AuditEventKind) -> AuditEvent {
        AuditEvent {
            guild_id: GUILD,
            executor_id: MOD,
            target_id: TARGET,
            kind,
            reason: Some("external action".to_string()),
        }
    }

    #[tokio::test]
    async fn test_own_actions_are_ignored() {
        let (observer, infractions, tasks) = observer(true, 0);

        let mut ev = event(AuditEventKind::BanAdd);
        ev.executor_id = BOT;
        observer.observe(ev).await;

        assert!(infractions.is_empty());
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_external_ban_drops_mute_task_even_when_untracked() {
        let (observer, infractions, tasks) = observer(false, 1);
        tasks.upsert(
            TaskKey::new(GUILD, TARGET, ReversalClass::Mute),
            "inf-1",
            Utc::now() + Duration::hours(1),
        );

        observer.observe(event(AuditEventKind::BanAdd)).await;

        // Task cleanup is unconditional, history recording is not.
        assert!(tasks.is_empty());
        assert!(infractions.is_empty());
    }

    #[tokio::test]
    async fn test_external_ban_is_recorded_when_tracked() {
        let (observer, infractions, _tasks) = observer(true, 1);

        observer.observe(event(AuditEventKind::BanAdd)).await;

        let page = infractions.search(GUILD, TARGET, Some(ActionKind::Ban), 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].flag, InfractionFlag::Native);
        assert_eq!(page.entries[0].executor_id, MOD);
        assert_eq!(page.entries[0].reason, "external action");
    }

    #[tokio::test]
    async fn test_native_timeout_creates_record_and_task() {
        let until = Utc::now() + Duration::minutes(30);
        let (observer, infractions, tasks) = observer(true, 1);

        observer.observe(event(AuditEventKind::TimeoutSet { until })).await;

        let page = infractions.search(GUILD, TARGET, Some(ActionKind::Mute), 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].expires_at, Some(until));

        let task = tasks
            .get(TaskKey::new(GUILD, TARGET, ReversalClass::Mute))
            .unwrap();
        assert_eq!(task.expires_at, until);
        assert_eq!(task.infraction_id, page.entries[0].id);
    }

    #[tokio::test]
    async fn test_native_timeout_untracked_leaves_no_trace() {
        let until = Utc::now() + Duration::minutes(30);
        let (observer, infractions, tasks) = observer(false, 0);

        observer.observe(event(AuditEventKind::TimeoutSet { until })).await;

        assert!(infractions.is_empty());
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_cleared_timeout_drops_task_and_records_unmute() {
        let (observer, infractions, tasks) = observer(true, 1);
        tasks.upsert(
            TaskKey::new(GUILD, TARGET, ReversalClass::Mute),
            "inf-1",
            Utc::now() + Duration::hours(1),
        );

        observer.observe(event(AuditEventKind::TimeoutCleared)).await;

        assert!(tasks.is_empty());
        let page = infractions.search(GUILD, TARGET, Some(ActionKind::Unmute), 0);
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_external_unban_drops_ban_task() {
        let (observer, _infractions, tasks) = observer(false, 1);
        tasks.upsert(
            TaskKey::new(GUILD, TARGET, ReversalClass::Ban),
            "inf-1",
            Utc::now() + Duration::hours(1),
        );

        observer.observe(event(AuditEventKind::BanRemove)).await;

        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_external_kick_is_history_only() {
        let (observer, infractions, tasks) = observer(true, 1);

        observer.observe(event(AuditEventKind::Kick)).await;

        assert_eq!(infractions.len(), 1);
        assert!(tasks.is_empty());
    }
}
