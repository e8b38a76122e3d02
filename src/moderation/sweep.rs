//! Reconciliation sweep
//!
//! The task runner periodically compares the task store against the
//! platform's actual state and reverses every punishment that is past due.
//! A missed tick is never fatal: tasks stay in the store until their
//! reversal verifiably succeeded, so the next sweep retries them.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::{
    ActionKind, Infraction, InfractionFlag, InfractionStore, NotificationPort, PlatformActionPort,
    RevTask, ReversalClass, TaskStore,
};
use crate::data::{GuildConfig, GuildConfigCache};

/// Reason recorded on the synthetic unmute when a mute lapses.
pub const MUTE_EXPIRED_REASON: &str = "Mute expired based on duration.";
/// Reason recorded on the synthetic unban when a timed ban lapses.
pub const BAN_EXPIRED_REASON: &str = "Ban expired based on duration.";

/// Requests the sweep loop reacts to between ticks
#[derive(Debug)]
pub enum SweepRequest {
    /// Run a full sweep now instead of waiting for the next interval tick
    Sweep,
    /// Sweep a single guild's due tasks
    CheckGuild {
        /// Guild to sweep
        guild_id: u64,
    },
    /// Stop the loop
    Shutdown,
}

/// Tuning knobs for the sweep loop
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often a full sweep runs
    pub interval: std::time::Duration,
    /// How far past its recorded expiry a native timeout may run before the
    /// sweep treats it as externally extended
    pub tolerance_ms: i64,
    /// Pause between per-task platform calls, to stay under rate limits
    pub item_delay: std::time::Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60),
            tolerance_ms: 10_000,
            item_delay: std::time::Duration::from_millis(250),
        }
    }
}

/// Durable-state flush point, invoked after every tick that mutated a store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Write the current store contents out. Failures are logged by the
    /// implementation and never surface into the sweep.
    async fn persist(&self);
}

/// What one tick did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Expired warn records removed from history
    pub pruned_warns: usize,
    /// Punishments reversed at the platform
    pub reversed: usize,
    /// Mute tasks pushed out because the native timeout was extended
    pub rescheduled: usize,
    /// Tasks dropped without reversal (guild gone or permission lost)
    pub dropped: usize,
}

impl TickReport {
    fn mutated(&self) -> bool {
        self.pruned_warns + self.reversed + self.rescheduled + self.dropped > 0
    }
}

/// Periodic reconciliation worker over the task store.
#[derive(Clone)]
pub struct TaskRunner {
    infractions: InfractionStore,
    tasks: TaskStore,
    platform: Arc<dyn PlatformActionPort>,
    notifier: Arc<dyn NotificationPort>,
    configs: GuildConfigCache,
    persistence: Arc<dyn StatePersistence>,
    config: SweepConfig,
    bot_id: u64,
}

impl TaskRunner {
    /// Wire up a runner over the stores and ports.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        infractions: InfractionStore,
        tasks: TaskStore,
        platform: Arc<dyn PlatformActionPort>,
        notifier: Arc<dyn NotificationPort>,
        configs: GuildConfigCache,
        persistence: Arc<dyn StatePersistence>,
        config: SweepConfig,
        bot_id: u64,
    ) -> Self {
        Self {
            infractions,
            tasks,
            platform,
            notifier,
            configs,
            persistence,
            config,
            bot_id,
        }
    }

    /// Spawn the sweep loop and return its request sender.
    pub fn spawn(self) -> Sender<SweepRequest> {
        let (tx, rx) = mpsc::channel::<SweepRequest>(16);
        tokio::spawn(async move {
            self.run(rx).await;
        });
        tx
    }

    /// The sweep loop: periodic ticks interleaved with explicit requests.
    pub async fn run(self, mut rx: Receiver<SweepRequest>) {
        info!(interval = ?self.config.interval, "starting reconciliation sweep");

        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                Some(request) = rx.recv() => {
                    match request {
                        SweepRequest::Sweep => {
                            self.tick().await;
                        }
                        SweepRequest::CheckGuild { guild_id } => {
                            self.check_guild(guild_id).await;
                        }
                        SweepRequest::Shutdown => {
                            info!("sweep received shutdown request");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("reconciliation sweep shut down");
    }

    /// Run one full sweep: prune warn history, then reverse every task due
    /// by now, guild by guild. State is flushed once at the end if anything
    /// changed.
    pub async fn tick(&self) -> TickReport {
        let now = Utc::now();
        let mut report = TickReport {
            pruned_warns: self.infractions.prune_expired_warns(now),
            ..TickReport::default()
        };

        for (guild_id, due) in self.tasks.list_expired(now) {
            self.sweep_guild(guild_id, due, &mut report).await;
        }

        if report.mutated() {
            debug!(?report, "sweep tick mutated state");
            self.persistence.persist().await;
        }
        report
    }

    /// Sweep one guild's due tasks without pruning or touching the others.
    pub async fn check_guild(&self, guild_id: u64) -> TickReport {
        let mut report = TickReport::default();
        if let Some(due) = self.tasks.list_expired(Utc::now()).remove(&guild_id) {
            self.sweep_guild(guild_id, due, &mut report).await;
        }
        if report.mutated() {
            self.persistence.persist().await;
        }
        report
    }

    async fn sweep_guild(&self, guild_id: u64, due: Vec<RevTask>, report: &mut TickReport) {
        if !self.platform.guild_reachable(guild_id).await {
            warn!(guild_id, count = due.len(), "guild unreachable, dropping its due tasks");
            for task in due {
                if self.tasks.delete(task.key()).is_some() {
                    report.dropped += 1;
                }
            }
            return;
        }

        let config = self.configs.get(guild_id).await;
        let can_unban = self.platform.can_unban(guild_id).await;

        for task in due {
            // Re-fetch under the key: an action or audit event may have
            // deleted or replaced the task since the listing.
            let Some(current) = self.tasks.get(task.key()) else {
                continue;
            };
            if current.id != task.id || current.expires_at > Utc::now() {
                continue;
            }

            match current.class {
                ReversalClass::Ban if !can_unban => {
                    warn!(
                        guild_id,
                        target_id = current.target_id,
                        "lacking ban permissions, dropping ban reversal task"
                    );
                    self.tasks.delete(current.key());
                    report.dropped += 1;
                }
                ReversalClass::Ban => self.reverse_ban(&config, &current, report).await,
                ReversalClass::Mute => self.reverse_mute(&config, &current, report).await,
            }

            tokio::time::sleep(self.config.item_delay).await;
        }
    }

    async fn reverse_ban(&self, config: &GuildConfig, task: &RevTask, report: &mut TickReport) {
        match self
            .platform
            .unban(task.guild_id, task.target_id, BAN_EXPIRED_REASON)
            .await
        {
            Ok(()) => {
                self.tasks.delete(task.key());
                let infraction = self.infractions.store(Infraction::new(
                    task.guild_id,
                    task.target_id,
                    self.bot_id,
                    ActionKind::Unban,
                    Some(BAN_EXPIRED_REASON.to_string()),
                    None,
                    InfractionFlag::Automatic,
                ));
                info!(
                    infraction_id = %infraction.id,
                    guild_id = task.guild_id,
                    target_id = task.target_id,
                    "timed ban reversed"
                );
                self.notifier
                    .log(
                        config,
                        &format!("[unban] <@{}> — {BAN_EXPIRED_REASON}", task.target_id),
                    )
                    .await;
                report.reversed += 1;
            }
            // Task stays in the store; the next tick retries.
            Err(e) => {
                error!(
                    guild_id = task.guild_id,
                    target_id = task.target_id,
                    error = %e,
                    "failed to reverse ban, will retry"
                );
            }
        }
    }

    async fn reverse_mute(&self, config: &GuildConfig, task: &RevTask, report: &mut TickReport) {
        // A timeout extended outside the bot wins: push the task out to the
        // actual expiry instead of cutting the longer timeout short.
        match self
            .platform
            .current_mute_expiry(task.guild_id, task.target_id)
            .await
        {
            Ok(Some(actual))
                if actual.timestamp_millis()
                    > task.expires_at.timestamp_millis() + self.config.tolerance_ms =>
            {
                debug!(
                    guild_id = task.guild_id,
                    target_id = task.target_id,
                    actual = %actual,
                    recorded = %task.expires_at,
                    "timeout extended externally, rescheduling reversal"
                );
                self.tasks
                    .upsert(task.key(), task.infraction_id.clone(), actual);
                report.rescheduled += 1;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    guild_id = task.guild_id,
                    target_id = task.target_id,
                    error = %e,
                    "could not read timeout state, will retry"
                );
                return;
            }
        }

        match self
            .platform
            .unmute(task.guild_id, task.target_id, MUTE_EXPIRED_REASON)
            .await
        {
            Ok(()) => {
                self.tasks.delete(task.key());
                let infraction = self.infractions.store(Infraction::new(
                    task.guild_id,
                    task.target_id,
                    self.bot_id,
                    ActionKind::Unmute,
                    Some(MUTE_EXPIRED_REASON.to_string()),
                    None,
                    InfractionFlag::Automatic,
                ));
                info!(
                    infraction_id = %infraction.id,
                    guild_id = task.guild_id,
                    target_id = task.target_id,
                    "mute reversed"
                );
                if config.notify_on_expiry {
                    let message =
                        format!("Your mute in guild {} has expired.", task.guild_id);
                    if !self.notifier.notify_target(task.target_id, &message).await {
                        debug!(target_id = task.target_id, "could not notify on expiry");
                    }
                }
                self.notifier
                    .log(
                        config,
                        &format!("[unmute] <@{}> — {MUTE_EXPIRED_REASON}", task.target_id),
                    )
                    .await;
                report.reversed += 1;
            }
            Err(e) => {
                error!(
                    guild_id = task.guild_id,
                    target_id = task.target_id,
                    error = %e,
                    "failed to reverse mute, will retry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockGuildConfigProvider;
    use crate::moderation::resolver::{
        MockNotificationPort, MockPlatformActionPort, PortError,
    };
    use crate::moderation::TaskKey;
    use chrono::Duration;

    const GUILD: u64 = 10;
    const TARGET: u64 = 20;
    const BOT: u64 = 999;

    struct Fixture {
        platform: MockPlatformActionPort,
        notifier: MockNotificationPort,
        persistence: MockStatePersistence,
        config: GuildConfig,
        infractions: InfractionStore,
        tasks: TaskStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                platform: MockPlatformActionPort::new(),
                notifier: MockNotificationPort::new(),
                persistence: MockStatePersistence::new(),
                config: GuildConfig {
                    guild_id: GUILD,
                    ..GuildConfig::default()
                },
                infractions: InfractionStore::new(),
                tasks: TaskStore::new(),
            }
        }

        fn reachable(&mut self) {
            self.platform
                .expect_guild_reachable()
                .returning(|_| true);
            self.platform.expect_can_unban().returning(|_| true);
        }

        fn expect_persist(&mut self) {
            self.persistence.expect_persist().once().returning(|| ());
        }

        fn runner(self) -> TaskRunner {
            let mut provider = MockGuildConfigProvider::new();
            let config = self.config.clone();
            provider.expect_fetch().returning(move |_| config.clone());
            TaskRunner::new(
                self.infractions,
                self.tasks,
                Arc::new(self.platform),
                Arc::new(self.notifier),
                GuildConfigCache::new(Arc::new(provider)),
                Arc::new(self.persistence),
                SweepConfig {
                    item_delay: std::time::Duration::ZERO,
                    ..SweepConfig::default()
                },
                BOT,
            )
        }
    }

    fn due_task(tasks: &TaskStore, target_id: u64, class: ReversalClass) -> RevTask {
        tasks.upsert(
            TaskKey::new(GUILD, target_id, class),
            "inf-1",
            Utc::now() - Duration::minutes(1),
        )
    }

    #[tokio::test]
    async fn test_due_mute_is_reversed() {
        let mut fx = Fixture::new();
        fx.reachable();
        fx.platform
            .expect_current_mute_expiry()
            .returning(|_, _| Ok(Some(Utc::now() - Duration::minutes(1))));
        fx.platform
            .expect_unmute()
            .once()
            .returning(|_, _, _| Ok(()));
        fx.notifier.expect_notify_target().returning(|_, _| true);
        fx.notifier.expect_log().returning(|_, _| ());
        fx.expect_persist();
        due_task(&fx.tasks, TARGET, ReversalClass::Mute);
        let infractions = fx.infractions.clone();
        let tasks = fx.tasks.clone();

        let report = fx.runner().tick().await;

        assert_eq!(report.reversed, 1);
        assert!(tasks.is_empty());
        let page = infractions.search(GUILD, TARGET, Some(ActionKind::Unmute), 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].flag, InfractionFlag::Automatic);
        assert_eq!(page.entries[0].executor_id, BOT);
        assert_eq!(page.entries[0].reason, MUTE_EXPIRED_REASON);
    }

    #[tokio::test]
    async fn test_externally_extended_timeout_reschedules() {
        let extended = Utc::now() + Duration::hours(1);
        let mut fx = Fixture::new();
        fx.reachable();
        // No unmute expectation: the call would panic the mock.
        fx.platform
            .expect_current_mute_expiry()
            .returning(move |_, _| Ok(Some(extended)));
        fx.expect_persist();
        let task = due_task(&fx.tasks, TARGET, ReversalClass::Mute);
        let infractions = fx.infractions.clone();
        let tasks = fx.tasks.clone();

        let report = fx.runner().tick().await;

        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.reversed, 0);
        let current = tasks.get(task.key()).unwrap();
        assert_eq!(current.expires_at, extended);
        assert!(infractions.is_empty());
    }

    #[tokio::test]
    async fn test_drift_within_tolerance_still_reverses() {
        let mut fx = Fixture::new();
        fx.reachable();
        let recorded = Utc::now() - Duration::minutes(1);
        // 5s past the recorded expiry, inside the 10s tolerance
        let actual = recorded + Duration::seconds(5);
        fx.platform
            .expect_current_mute_expiry()
            .returning(move |_, _| Ok(Some(actual)));
        fx.platform
            .expect_unmute()
            .once()
            .returning(|_, _, _| Ok(()));
        fx.notifier.expect_notify_target().returning(|_, _| true);
        fx.notifier.expect_log().returning(|_, _| ());
        fx.expect_persist();
        fx.tasks
            .upsert(TaskKey::new(GUILD, TARGET, ReversalClass::Mute), "inf-1", recorded);

        let report = fx.runner().tick().await;
        assert_eq!(report.reversed, 1);
        assert_eq!(report.rescheduled, 0);
    }

    #[tokio::test]
    async fn test_expired_ban_is_unbanned() {
        let mut fx = Fixture::new();
        fx.reachable();
        fx.platform.expect_unban().once().returning(|_, _, _| Ok(()));
        fx.notifier.expect_log().returning(|_, _| ());
        fx.expect_persist();
        due_task(&fx.tasks, TARGET, ReversalClass::Ban);
        let infractions = fx.infractions.clone();
        let tasks = fx.tasks.clone();

        let report = fx.runner().tick().await;

        assert_eq!(report.reversed, 1);
        assert!(tasks.is_empty());
        let page = infractions.search(GUILD, TARGET, Some(ActionKind::Unban), 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].reason, BAN_EXPIRED_REASON);
    }

    #[tokio::test]
    async fn test_unreachable_guild_drops_tasks_without_platform_calls() {
        let mut fx = Fixture::new();
        fx.platform
            .expect_guild_reachable()
            .once()
            .returning(|_| false);
        fx.expect_persist();
        due_task(&fx.tasks, TARGET, ReversalClass::Mute);
        due_task(&fx.tasks, TARGET, ReversalClass::Ban);
        let tasks = fx.tasks.clone();
        let infractions = fx.infractions.clone();

        let report = fx.runner().tick().await;

        assert_eq!(report.dropped, 2);
        assert!(tasks.is_empty());
        assert!(infractions.is_empty());
    }

    #[tokio::test]
    async fn test_ban_task_dropped_without_unban_permission() {
        let mut fx = Fixture::new();
        fx.platform.expect_guild_reachable().returning(|_| true);
        fx.platform.expect_can_unban().returning(|_| false);
        fx.expect_persist();
        due_task(&fx.tasks, TARGET, ReversalClass::Ban);
        let tasks = fx.tasks.clone();
        let infractions = fx.infractions.clone();

        let report = fx.runner().tick().await;

        assert_eq!(report.dropped, 1);
        assert!(tasks.is_empty());
        assert!(infractions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_reversal_keeps_task_and_others_proceed() {
        let mut fx = Fixture::new();
        fx.reachable();
        fx.platform
            .expect_current_mute_expiry()
            .returning(|_, _| Ok(None));
        // Target 20 fails, target 21 succeeds
        fx.platform
            .expect_unmute()
            .returning(|_, target_id, _| {
                if target_id == TARGET {
                    Err(PortError::new("api error"))
                } else {
                    Ok(())
                }
            });
        fx.notifier.expect_notify_target().returning(|_, _| true);
        fx.notifier.expect_log().returning(|_, _| ());
        fx.expect_persist();
        due_task(&fx.tasks, TARGET, ReversalClass::Mute);
        due_task(&fx.tasks, TARGET + 1, ReversalClass::Mute);
        let tasks = fx.tasks.clone();

        let report = fx.runner().tick().await;

        assert_eq!(report.reversed, 1);
        // The failed task stays for the next tick.
        assert!(tasks
            .get(TaskKey::new(GUILD, TARGET, ReversalClass::Mute))
            .is_some());
        assert!(tasks
            .get(TaskKey::new(GUILD, TARGET + 1, ReversalClass::Mute))
            .is_none());
    }

    #[tokio::test]
    async fn test_tick_prunes_expired_warns() {
        let mut fx = Fixture::new();
        fx.expect_persist();
        fx.infractions.store(Infraction::new(
            GUILD,
            TARGET,
            1,
            ActionKind::Warn,
            None,
            Some(Utc::now() - Duration::hours(1)),
            InfractionFlag::Default,
        ));
        let infractions = fx.infractions.clone();

        let report = fx.runner().tick().await;

        assert_eq!(report.pruned_warns, 1);
        assert!(infractions.is_empty());
    }

    #[tokio::test]
    async fn test_check_guild_leaves_other_guilds_alone() {
        let mut fx = Fixture::new();
        fx.reachable();
        fx.platform
            .expect_current_mute_expiry()
            .returning(|_, _| Ok(None));
        fx.platform
            .expect_unmute()
            .once()
            .returning(|_, _, _| Ok(()));
        fx.notifier.expect_notify_target().returning(|_, _| true);
        fx.notifier.expect_log().returning(|_, _| ());
        fx.expect_persist();
        due_task(&fx.tasks, TARGET, ReversalClass::Mute);
        fx.tasks.upsert(
            TaskKey::new(GUILD + 1, TARGET, ReversalClass::Mute),
            "inf-other",
            Utc::now() - Duration::minutes(1),
        );
        let tasks = fx.tasks.clone();

        let report = fx.runner().check_guild(GUILD).await;

        assert_eq!(report.reversed, 1);
        // The other guild's due task is untouched until a full tick.
        assert!(tasks
            .get(TaskKey::new(GUILD + 1, TARGET, ReversalClass::Mute))
            .is_some());
    }

    #[tokio::test]
    async fn test_quiet_tick_does_not_persist() {
        let fx = Fixture::new();
        // No persistence expectation: a call would panic the mock.
        let report = fx.runner().tick().await;
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn test_shutdown_request_stops_the_loop() {
        let fx = Fixture::new();
        let tx = fx.runner().spawn();

        tx.send(SweepRequest::Shutdown).await.unwrap();
        // The loop drops its receiver once it breaks.
        tokio::time::timeout(std::time::Duration::from_secs(1), tx.closed())
            .await
            .unwrap();
    }
}
