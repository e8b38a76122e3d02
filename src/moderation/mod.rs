//! Moderation core
//!
//! The deferred-action engine: moderation commands flow through the
//! [`ActionOrchestrator`], timed punishments leave a reversal task behind,
//! the [`TaskRunner`] sweep reverses whatever is past due, and the
//! [`ExternalActionObserver`] folds moderation done outside the bot back
//! into the same stores. Platform access goes through the ports in
//! [`resolver`]; [`platform`] holds the Discord-backed implementations.

pub mod action;
pub mod error;
pub mod infraction;
pub mod observer;
pub mod orchestrator;
pub mod platform;
pub mod resolver;
pub mod sweep;
pub mod task;

pub use action::{
    ActionKind, BAN_MAX_MS, DurationSpec, InfractionFlag, MAX_DELETE_MESSAGE_SECONDS, MUTE_MAX_MS,
    MUTE_MIN_MS, NO_REASON, ReversalClass,
};
pub use error::{ModerationError, ModerationResult};
pub use infraction::{
    Infraction, InfractionPage, InfractionStore, SEARCH_PAGE_SIZE, next_infraction_id,
};
pub use observer::{AuditEvent, AuditEventKind, ExternalActionObserver};
pub use orchestrator::{ActionOrchestrator, ActionRequest, TargetProfile};
pub use platform::{DiscordActionPort, DiscordNotifier, ModRoleGate};
pub use resolver::{
    NotificationPort, PermissionGate, PlatformActionPort, PortError, PunishmentResolver,
    ResolveOutcome,
};
pub use sweep::{
    BAN_EXPIRED_REASON, MUTE_EXPIRED_REASON, StatePersistence, SweepConfig, SweepRequest,
    TaskRunner, TickReport,
};
pub use task::{RevTask, TaskKey, TaskStore};
