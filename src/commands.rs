use poise::{CreateReply, command, serenity_prelude as serenity};
use tracing::error;

use crate::data::ConfigToggle;
use crate::moderation::{
    ActionKind, ActionRequest, DurationSpec, InfractionFlag, MUTE_MAX_MS, MUTE_MIN_MS,
    ModerationError, SEARCH_PAGE_SIZE, SweepRequest, TargetProfile,
};
use crate::{Context, Error, duration};

/// Slash-option filter for the infraction lookup.
#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum KindFilter {
    Warn,
    Mute,
    Kick,
    Ban,
    Unmute,
    Unban,
}

impl From<KindFilter> for ActionKind {
    fn from(filter: KindFilter) -> Self {
        match filter {
            KindFilter::Warn => Self::Warn,
            KindFilter::Mute => Self::Mute,
            KindFilter::Kick => Self::Kick,
            KindFilter::Ban => Self::Ban,
            KindFilter::Unmute => Self::Unmute,
            KindFilter::Unban => Self::Unban,
        }
    }
}

/// Extract the hierarchy facts validation needs from the cached guild.
///
/// Runs synchronously so the cache reference never lives across an await.
fn build_profile(
    ctx: Context<'_>,
    target_id: serenity::UserId,
) -> Result<(u64, TargetProfile), Error> {
    let guild = ctx
        .guild()
        .ok_or("this command can only be used in a server")?;
    let executor = guild
        .members
        .get(&ctx.author().id)
        .ok_or("could not resolve your guild membership")?;
    let bot_id = ctx.framework().bot_id;

    let top_position = |member: &serenity::Member| {
        member
            .roles
            .iter()
            .filter_map(|role_id| guild.roles.get(role_id))
            .map(|role| role.position)
            .max()
    };
    let target_member = guild.members.get(&target_id);

    let profile = TargetProfile {
        target_is_owner: guild.owner_id == target_id,
        target_in_guild: target_member.is_some(),
        executor_is_owner: guild.owner_id == executor.user.id,
        executor_is_admin: guild.member_permissions(executor).administrator(),
        executor_roles: executor.roles.iter().map(|id| id.get()).collect(),
        executor_top_role: top_position(executor),
        target_top_role: target_member.and_then(&top_position),
        bot_top_role: guild.members.get(&bot_id).and_then(&top_position),
    };
    Ok((guild.id.get(), profile))
}

/// Map a raw duration option through the sentinel check and the parser.
fn spec_from(raw: Option<&str>) -> Result<DurationSpec, Error> {
    match raw {
        None => Ok(DurationSpec::Unspecified),
        Some(s) if duration::is_permanent(s) => Ok(DurationSpec::Permanent),
        Some(s) => duration::parse_duration(Some(s))
            .map(DurationSpec::Millis)
            .ok_or_else(|| {
                format!("could not parse duration `{s}`; try `10m`, `2h`, or `perm`").into()
            }),
    }
}

/// Shared tail of every moderation command: build the request, hand it to
/// the orchestrator, persist, reply.
async fn run_action(
    ctx: Context<'_>,
    target: &serenity::User,
    kind: ActionKind,
    reason: Option<String>,
    duration: DurationSpec,
    delete_message_seconds: Option<u32>,
    flag: InfractionFlag,
) -> Result<(), Error> {
    let (guild_id, profile) = build_profile(ctx, target.id)?;
    let request = ActionRequest {
        guild_id,
        executor_id: ctx.author().id.get(),
        target_id: target.id.get(),
        kind,
        reason,
        duration,
        delete_message_seconds,
        flag,
        profile,
    };

    match ctx.data().orchestrator.issue(request).await {
        Ok(infraction) => {
            if let Err(e) = ctx.data().data.save().await {
                error!("failed to persist after {kind}: {e}");
            }
            let mut message = format!(
                "**{}** {} — {} `[{}]`",
                infraction.kind, target.name, infraction.reason, infraction.id
            );
            if let Some(at) = infraction.expires_at {
                message.push_str(&format!(" (expires <t:{}:R>)", at.timestamp()));
            }
            ctx.say(message).await?;
        }
        Err(ModerationError::Refused(message)) => {
            ctx.send(CreateReply::default().content(message).ephemeral(true))
                .await?;
        }
        Err(e) => {
            ctx.say(format!("Something went wrong: {e}")).await?;
        }
    }
    Ok(())
}

/// Record a warning for a member
#[command(slash_command, guild_only, category = "Moderation")]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
    #[description = "How long the warning stays on record, e.g. 30d"] duration: Option<String>,
) -> Result<(), Error> {
    let spec = spec_from(duration.as_deref())?;
    run_action(ctx, &user, ActionKind::Warn, reason, spec, None, InfractionFlag::Default).await
}

/// Time a member out
#[command(slash_command, guild_only, category = "Moderation")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "How long, e.g. 10m or 2h; falls back to the server default"]
    duration: Option<String>,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    let spec = spec_from(duration.as_deref())?;
    run_action(ctx, &user, ActionKind::Mute, reason, spec, None, InfractionFlag::Default).await
}

/// Lift a member's timeout early
#[command(slash_command, guild_only, category = "Moderation")]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    run_action(
        ctx,
        &user,
        ActionKind::Unmute,
        reason,
        DurationSpec::Unspecified,
        None,
        InfractionFlag::Default,
    )
    .await
}

/// Kick a member from the server
#[command(slash_command, guild_only, category = "Moderation")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    run_action(
        ctx,
        &user,
        ActionKind::Kick,
        reason,
        DurationSpec::Unspecified,
        None,
        InfractionFlag::Default,
    )
    .await
}

/// Ban a user, permanently or for a duration
#[command(slash_command, guild_only, category = "Moderation")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "User to ban"] user: serenity::User,
    #[description = "How long, e.g. 7d; omit or `perm` for permanent"] duration: Option<String>,
    #[description = "Why"] reason: Option<String>,
    #[description = "Delete their messages from the last N days (max 7)"]
    delete_message_days: Option<u8>,
) -> Result<(), Error> {
    let spec = spec_from(duration.as_deref())?;
    let delete_message_seconds = delete_message_days.map(|days| u32::from(days) * 86_400);
    run_action(
        ctx,
        &user,
        ActionKind::Ban,
        reason,
        spec,
        delete_message_seconds,
        InfractionFlag::Default,
    )
    .await
}

/// Lift a ban
#[command(slash_command, guild_only, category = "Moderation")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    run_action(
        ctx,
        &user,
        ActionKind::Unban,
        reason,
        DurationSpec::Unspecified,
        None,
        InfractionFlag::Default,
    )
    .await
}

/// Permanently ban a user straight from the context menu
#[command(context_menu_command = "Quick Ban", guild_only, category = "Moderation")]
pub async fn quick_ban(ctx: Context<'_>, user: serenity::User) -> Result<(), Error> {
    run_action(
        ctx,
        &user,
        ActionKind::Ban,
        None,
        DurationSpec::Permanent,
        None,
        InfractionFlag::Quick,
    )
    .await
}

/// Show a member's infraction history
#[command(slash_command, guild_only, category = "Moderation")]
pub async fn infractions(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
    #[description = "Only show this kind"] kind: Option<KindFilter>,
    #[description = "Page, starting at 1"] page: Option<usize>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("this command can only be used in a server")?
        .get();
    let page_index = page.unwrap_or(1).saturating_sub(1);
    let results = ctx
        .data()
        .data
        .infractions
        .search(guild_id, user.id.get(), kind.map(ActionKind::from), page_index);

    if results.total == 0 {
        ctx.say(format!("No infractions on record for {}.", user.name))
            .await?;
        return Ok(());
    }

    let total_pages = results.total.div_ceil(SEARCH_PAGE_SIZE);
    let mut lines = vec![format!(
        "**{}** infraction(s) for **{}** (page {}/{total_pages})",
        results.total,
        user.name,
        results.page + 1
    )];
    for record in &results.entries {
        let mut line = format!(
            "`{}` **{}** <t:{}:d> by <@{}> — {}",
            record.id,
            record.kind,
            record.created_at.timestamp(),
            record.executor_id,
            record.reason
        );
        if let Some(at) = record.expires_at {
            line.push_str(&format!(" (expires <t:{}:d>)", at.timestamp()));
        }
        lines.push(line);
    }
    ctx.say(lines.join("\n")).await?;
    Ok(())
}

/// Run a reconciliation sweep immediately instead of waiting for the timer
#[command(slash_command, guild_only, owners_only, category = "Moderation")]
pub async fn sweep(
    ctx: Context<'_>,
    #[description = "Sweep every guild, not just this one"] everywhere: Option<bool>,
) -> Result<(), Error> {
    let request = if everywhere.unwrap_or(false) {
        SweepRequest::Sweep
    } else {
        let guild_id = ctx
            .guild_id()
            .ok_or("this command can only be used in a server")?
            .get();
        SweepRequest::CheckGuild { guild_id }
    };
    ctx.data()
        .sweep
        .send(request)
        .await
        .map_err(|_| "the sweep loop is not running")?;
    ctx.say("Sweep requested.").await?;
    Ok(())
}

/// Configure moderation for this server
#[command(
    slash_command,
    guild_only,
    category = "Moderation",
    subcommands("show", "toggle", "default_mute", "mod_role", "log_channel"),
    default_member_permissions = "MANAGE_GUILD"
)]
pub async fn settings(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the current settings
#[command(slash_command, guild_only)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("this command can only be used in a server")?
        .get();
    let config = ctx.data().configs.get(guild_id).await;

    let default_mute = config
        .default_mute_duration_ms
        .map_or_else(|| "unset".to_string(), |ms| format!("{}s", ms / 1000));
    let mod_role = config
        .mod_role_id
        .map_or_else(|| "unset (admins only)".to_string(), |id| format!("<@&{id}>"));
    let log_channel = config
        .log_channel_id
        .map_or_else(|| "unset".to_string(), |id| format!("<#{id}>"));

    ctx.say(format!(
        "require_reason: `{}`\ntrack_native: `{}`\nnotify_on_expiry: `{}`\ndefault mute: `{default_mute}`\nmod role: {mod_role}\nlog channel: {log_channel}",
        config.require_reason, config.track_native, config.notify_on_expiry,
    ))
    .await?;
    Ok(())
}

/// Flip a boolean setting
#[command(slash_command, guild_only)]
pub async fn toggle(
    ctx: Context<'_>,
    #[description = "Which setting"] setting: ConfigToggle,
    #[description = "New value"] value: bool,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("this command can only be used in a server")?
        .get();
    let mut config = ctx.data().configs.get(guild_id).await;
    setting.apply(&mut config, value);
    ctx.data().configs.update(guild_id, config).await;
    ctx.say(format!("`{setting:?}` is now `{value}`.")).await?;
    Ok(())
}

/// Set or clear the fallback mute duration
#[command(slash_command, guild_only)]
pub async fn default_mute(
    ctx: Context<'_>,
    #[description = "Duration, e.g. 1h; omit to clear"] duration: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("this command can only be used in a server")?
        .get();
    let ms = match duration.as_deref() {
        None => None,
        Some(raw) => {
            let ms = crate::duration::parse_duration(Some(raw))
                .ok_or_else(|| format!("could not parse duration `{raw}`"))?;
            if !(MUTE_MIN_MS..=MUTE_MAX_MS).contains(&ms) {
                return Err("default mute duration must be between 1 second and 28 days".into());
            }
            Some(ms)
        }
    };

    let mut config = ctx.data().configs.get(guild_id).await;
    config.default_mute_duration_ms = ms;
    ctx.data().configs.update(guild_id, config).await;

    match ms {
        Some(ms) => {
            ctx.say(format!("Default mute duration set to {}s.", ms / 1000))
                .await?
        }
        None => {
            ctx.say("Default mute duration cleared; mutes now need an explicit duration.")
                .await?
        }
    };
    Ok(())
}

/// Set or clear the moderator role
#[command(slash_command, guild_only)]
pub async fn mod_role(
    ctx: Context<'_>,
    #[description = "Role allowed to moderate; omit to restrict to admins"]
    role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("this command can only be used in a server")?
        .get();
    let mut config = ctx.data().configs.get(guild_id).await;
    config.mod_role_id = role.as_ref().map(|r| r.id.get());
    ctx.data().configs.update(guild_id, config).await;

    match role {
        Some(role) => {
            ctx.say(format!("Moderator role set to {}.", role.name))
                .await?
        }
        None => {
            ctx.say("Moderator role cleared; only admins may moderate.")
                .await?
        }
    };
    Ok(())
}

/// Set or clear the moderation log channel
#[command(slash_command, guild_only)]
pub async fn log_channel(
    ctx: Context<'_>,
    #[description = "Channel for moderation log entries; omit to disable"]
    channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("this command can only be used in a server")?
        .get();
    let mut config = ctx.data().configs.get(guild_id).await;
    config.log_channel_id = channel.as_ref().map(|c| c.id.get());
    ctx.data().configs.update(guild_id, config).await;

    match channel {
        Some(channel) => {
            ctx.say(format!("Moderation log channel set to <#{}>.", channel.id))
                .await?
        }
        None => ctx.say("Moderation log disabled.").await?,
    };
    Ok(())
}
