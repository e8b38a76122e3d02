//! Action orchestrator
//!
//! Per-command pipeline: Validate → Resolve-Duration → Apply-Punishment →
//! Persist-Infraction → Reconcile-Task → Notify/Log. The infraction is
//! persisted optimistically before the platform call; when the call fails
//! the record is deleted again, so no infraction ever survives a punishment
//! that did not take effect. The same policy applies to every action kind,
//! Kick included.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    ActionKind, BAN_MAX_MS, DurationSpec, Infraction, InfractionFlag, InfractionStore,
    MAX_DELETE_MESSAGE_SECONDS, MUTE_MAX_MS, MUTE_MIN_MS, ModerationError, ModerationResult,
    NotificationPort, PermissionGate, PlatformActionPort, PunishmentResolver, TaskKey, TaskStore,
};
use crate::data::{GuildConfig, GuildConfigCache};

/// Hierarchy and permission facts about one invocation, extracted by the
/// command layer so validation stays pure.
#[derive(Debug, Clone, Default)]
pub struct TargetProfile {
    /// Target owns the guild
    pub target_is_owner: bool,
    /// Target is currently a member (unban targets usually are not)
    pub target_in_guild: bool,
    /// Executor owns the guild (outranks everyone)
    pub executor_is_owner: bool,
    /// Executor has the administrator permission
    pub executor_is_admin: bool,
    /// Executor's role ids, for the permission predicate
    pub executor_roles: Vec<u64>,
    /// Position of the executor's highest role
    pub executor_top_role: Option<u16>,
    /// Position of the target's highest role
    pub target_top_role: Option<u16>,
    /// Position of the bot's highest role
    pub bot_top_role: Option<u16>,
}

/// One moderation action to carry out
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Guild the action applies in
    pub guild_id: u64,
    /// Moderator issuing the action
    pub executor_id: u64,
    /// User the action targets
    pub target_id: u64,
    /// What to do
    pub kind: ActionKind,
    /// Moderator-supplied reason
    pub reason: Option<String>,
    /// Resolved duration intent
    pub duration: DurationSpec,
    /// Ban-only: delete the target's recent messages, window in seconds
    pub delete_message_seconds: Option<u32>,
    /// Origin marker for the infraction record
    pub flag: InfractionFlag,
    /// Hierarchy facts for validation
    pub profile: TargetProfile,
}

/// Carries out moderation actions end to end.
#[derive(Clone)]
pub struct ActionOrchestrator {
    infractions: InfractionStore,
    tasks: TaskStore,
    platform: Arc<dyn PlatformActionPort>,
    resolver: PunishmentResolver,
    notifier: Arc<dyn NotificationPort>,
    permissions: Arc<dyn PermissionGate>,
    configs: GuildConfigCache,
    bot_id: u64,
}

impl ActionOrchestrator {
    /// Wire up an orchestrator over the stores and ports.
    pub fn new(
        infractions: InfractionStore,
        tasks: TaskStore,
        platform: Arc<dyn PlatformActionPort>,
        notifier: Arc<dyn NotificationPort>,
        permissions: Arc<dyn PermissionGate>,
        configs: GuildConfigCache,
        bot_id: u64,
    ) -> Self {
        Self {
            infractions,
            tasks,
            resolver: PunishmentResolver::new(Arc::clone(&platform)),
            platform,
            notifier,
            permissions,
            configs,
            bot_id,
        }
    }

    /// Carry out one moderation action and return the persisted infraction.
    ///
    /// # Errors
    ///
    /// [`ModerationError::Refused`] with a user-facing message when
    /// validation fails (nothing was mutated), or
    /// [`ModerationError::PlatformFailed`] when the platform call failed
    /// (the compensating delete has already run).
    pub async fn issue(&self, req: ActionRequest) -> ModerationResult<Infraction> {
        let config = self.configs.get(req.guild_id).await;

        self.validate(&req, &config)?;
        let expires_at = self.resolve_expiry(&req, &config)?;
        self.precheck_reversal(&req).await?;

        // Persist optimistically, attempt, compensate on failure.
        let infraction = self.infractions.store(Infraction::new(
            req.guild_id,
            req.target_id,
            req.executor_id,
            req.kind,
            req.reason.clone(),
            expires_at,
            req.flag,
        ));

        let duration_ms = expires_at.map(|at| (at - infraction.created_at).num_milliseconds());
        let outcome = self
            .resolver
            .resolve(
                req.kind,
                req.guild_id,
                req.target_id,
                &infraction.reason,
                duration_ms,
                req.delete_message_seconds,
            )
            .await;

        if !outcome.applied() {
            self.infractions.delete(&infraction.id);
            return Err(ModerationError::PlatformFailed {
                action: req.kind,
                target_id: req.target_id,
            });
        }

        self.reconcile_task(&req, &infraction, expires_at);

        info!(
            infraction_id = %infraction.id,
            guild_id = req.guild_id,
            target_id = req.target_id,
            executor_id = req.executor_id,
            kind = %req.kind,
            expires_at = ?expires_at,
            "moderation action applied"
        );

        self.dispatch_side_effects(&config, &infraction).await;

        Ok(infraction)
    }

    fn validate(&self, req: &ActionRequest, config: &GuildConfig) -> ModerationResult<()> {
        let kind = req.kind;

        if req.target_id == req.executor_id {
            return Err(ModerationError::refused(format!(
                "you cannot {kind} yourself"
            )));
        }
        if req.target_id == self.bot_id {
            return Err(ModerationError::refused(format!("you cannot {kind} me")));
        }
        if req.profile.target_is_owner {
            return Err(ModerationError::refused(format!(
                "the server owner cannot be {}", verbed(kind)
            )));
        }

        if kind.hierarchy_sensitive() && req.profile.target_in_guild {
            let target_rank = req.profile.target_top_role.unwrap_or(0);
            if !req.profile.executor_is_owner
                && req.profile.executor_top_role.unwrap_or(0) <= target_rank
            {
                return Err(ModerationError::refused(format!(
                    "you cannot {kind} a member ranked at or above you"
                )));
            }
            if req.profile.bot_top_role.unwrap_or(0) <= target_rank {
                return Err(ModerationError::refused(format!(
                    "I cannot {kind} a member ranked at or above me"
                )));
            }
        }

        if config.require_reason && req.reason.as_deref().is_none_or(|r| r.trim().is_empty()) {
            return Err(ModerationError::refused(
                "this server requires a reason for moderation actions",
            ));
        }

        if req
            .delete_message_seconds
            .is_some_and(|secs| secs > MAX_DELETE_MESSAGE_SECONDS)
        {
            return Err(ModerationError::refused(
                "messages can be deleted at most 7 days back",
            ));
        }

        if !self.permissions.allows(
            config,
            &req.profile.executor_roles,
            req.profile.executor_is_admin,
            kind,
        ) {
            return Err(ModerationError::refused(format!(
                "you are not permitted to {kind} members here"
            )));
        }

        Ok(())
    }

    /// Resolve the request's duration intent into an expiry instant.
    fn resolve_expiry(
        &self,
        req: &ActionRequest,
        config: &GuildConfig,
    ) -> ModerationResult<Option<DateTime<Utc>>> {
        let now = Utc::now();
        match req.kind {
            ActionKind::Mute => {
                let ms = match req.duration {
                    DurationSpec::Millis(ms) => ms,
                    DurationSpec::Unspecified => config
                        .default_mute_duration_ms
                        .filter(|ms| *ms > 0)
                        .ok_or_else(|| {
                            ModerationError::refused(
                                "this server has no default mute duration; supply one explicitly",
                            )
                        })?,
                    DurationSpec::Permanent => {
                        return Err(ModerationError::refused(
                            "mutes cannot be permanent; the longest mute is 28 days",
                        ));
                    }
                };
                if !(MUTE_MIN_MS..=MUTE_MAX_MS).contains(&ms) {
                    return Err(ModerationError::refused(
                        "mute duration must be between 1 second and 28 days",
                    ));
                }
                Ok(Some(now + Duration::milliseconds(ms)))
            }
            ActionKind::Ban => match req.duration {
                DurationSpec::Millis(ms) => {
                    if ms < MUTE_MIN_MS {
                        return Err(ModerationError::refused(
                            "ban duration must be at least 1 second",
                        ));
                    }
                    if ms > BAN_MAX_MS {
                        return Err(ModerationError::refused("timed bans are capped at 365 days"));
                    }
                    Ok(Some(now + Duration::milliseconds(ms)))
                }
                DurationSpec::Unspecified | DurationSpec::Permanent => Ok(None),
            },
            ActionKind::Warn => match req.duration {
                DurationSpec::Millis(ms) if ms > 0 => Ok(Some(now + Duration::milliseconds(ms))),
                _ => Ok(None),
            },
            ActionKind::Kick | ActionKind::Unmute | ActionKind::Unban => Ok(None),
        }
    }

    /// Manual unmute/unban refuse when the target is already clear, so the
    /// resolver is only invoked with the precondition holding.
    async fn precheck_reversal(&self, req: &ActionRequest) -> ModerationResult<()> {
        match req.kind {
            ActionKind::Unmute => {
                let expiry = self
                    .platform
                    .current_mute_expiry(req.guild_id, req.target_id)
                    .await
                    .map_err(|_| ModerationError::PlatformFailed {
                        action: req.kind,
                        target_id: req.target_id,
                    })?;
                if expiry.is_none_or(|at| at <= Utc::now()) {
                    return Err(ModerationError::refused("that member is not muted"));
                }
            }
            ActionKind::Unban => {
                let banned = self
                    .platform
                    .is_banned(req.guild_id, req.target_id)
                    .await
                    .map_err(|_| ModerationError::PlatformFailed {
                        action: req.kind,
                        target_id: req.target_id,
                    })?;
                if !banned {
                    return Err(ModerationError::refused("that user is not banned"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Bring the task store in line with the action that just succeeded.
    fn reconcile_task(
        &self,
        req: &ActionRequest,
        infraction: &Infraction,
        expires_at: Option<DateTime<Utc>>,
    ) {
        if let Some(class) = req.kind.reversal_class() {
            let key = TaskKey::new(req.guild_id, req.target_id, class);
            match expires_at {
                Some(at) => {
                    self.tasks.upsert(key, infraction.id.clone(), at);
                }
                // A permanent ban must not leave an old expiry lingering.
                None => {
                    self.tasks.delete(key);
                }
            }
        } else if let Some(class) = req.kind.clears_class() {
            self.tasks
                .delete(TaskKey::new(req.guild_id, req.target_id, class));
        }
    }

    /// Best-effort notify + log. Awaited for determinism, but failures are
    /// swallowed here and can never become the orchestrator's own failure.
    async fn dispatch_side_effects(&self, config: &GuildConfig, infraction: &Infraction) {
        let mut dm = format!(
            "You were {} in guild {}: {}",
            verbed(infraction.kind),
            infraction.guild_id,
            infraction.reason
        );
        if let Some(at) = infraction.expires_at {
            dm.push_str(&format!(" (until {})", at.format("%Y-%m-%d %H:%M UTC")));
        }
        if !self.notifier.notify_target(infraction.target_id, &dm).await {
            debug!(
                target_id = infraction.target_id,
                "could not notify target directly"
            );
        }

        let mut entry = format!(
            "[{}] <@{}> by <@{}> — {}",
            infraction.kind, infraction.target_id, infraction.executor_id, infraction.reason
        );
        if let Some(at) = infraction.expires_at {
            entry.push_str(&format!(" (expires {})", at.format("%Y-%m-%d %H:%M UTC")));
        }
        self.notifier.log(config, &entry).await;
    }
}

/// Past-tense rendering for user-facing messages.
fn verbed(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Warn => "warned",
        ActionKind::Mute => "muted",
        ActionKind::Kick => "kicked",
        ActionKind::Ban => "banned",
        ActionKind::Unmute => "unmuted",
        ActionKind::Unban => "unbanned",
    }
}
