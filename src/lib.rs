pub mod commands;
pub mod data;
pub mod duration;
pub mod handlers;
pub mod logging;
pub mod moderation;

// Customize these constants for your bot
pub const COMMAND_TARGET: &str = "modwarden::command";
pub const ERROR_TARGET: &str = "modwarden::error";
pub const EVENT_TARGET: &str = "modwarden::handlers";

pub use data::{Data, DataInner, GuildConfigCache};
pub use moderation::{ActionOrchestrator, SweepRequest};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Everything the command layer needs, built once at startup.
pub struct App {
    /// Durable stores and their persistence
    pub data: Data,
    /// Carries out moderation actions end to end
    pub orchestrator: ActionOrchestrator,
    /// Per-guild configuration, read-through cached
    pub configs: GuildConfigCache,
    /// Handle into the reconciliation sweep loop
    pub sweep: tokio::sync::mpsc::Sender<SweepRequest>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish_non_exhaustive()
    }
}

pub type Context<'a> = poise::Context<'a, App, Error>;
