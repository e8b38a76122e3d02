use std::env;
use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};
use serenity::{GatewayIntents, Http};
use tracing::info;

use modwarden::moderation::{
    ActionOrchestrator, DiscordActionPort, DiscordNotifier, ExternalActionObserver, ModRoleGate,
    SweepConfig, SweepRequest, TaskRunner,
};
use modwarden::{App, Data, Error, GuildConfigCache, commands, handlers, logging};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    // Initialize logging
    logging::init()?;

    // Load environment variables
    let token = env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN must be set");

    // Restore the durable stores from disk
    let data = Data::load().await;
    info!(data = ?data, "Stores loaded");

    // The HTTP client is shared by the gateway client, the orchestrator,
    // the sweep, and the notifier.
    let http = Arc::new(Http::new(&token));
    let bot_id = http.get_current_user().await?.id.get();

    let platform = Arc::new(DiscordActionPort::new(Arc::clone(&http)));
    let notifier = Arc::new(DiscordNotifier::new(Arc::clone(&http)));
    let configs = GuildConfigCache::new(Arc::new(data.clone()));

    let orchestrator = ActionOrchestrator::new(
        data.infractions.clone(),
        data.tasks.clone(),
        platform.clone(),
        notifier.clone(),
        Arc::new(ModRoleGate),
        configs.clone(),
        bot_id,
    );

    // Spawn the reconciliation sweep; restored tasks are picked up on the
    // first tick without any re-scheduling step.
    let runner = TaskRunner::new(
        data.infractions.clone(),
        data.tasks.clone(),
        platform,
        notifier,
        configs.clone(),
        Arc::new(data.clone()),
        SweepConfig::default(),
        bot_id,
    );
    let sweep = runner.spawn();

    let observer = ExternalActionObserver::new(
        data.infractions.clone(),
        data.tasks.clone(),
        configs.clone(),
        Arc::new(data.clone()),
        bot_id,
    );

    let app = App {
        data: data.clone(),
        orchestrator,
        configs,
        sweep: sweep.clone(),
    };

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::warn(),
                commands::mute(),
                commands::unmute(),
                commands::kick(),
                commands::ban(),
                commands::unban(),
                commands::quick_ban(),
                commands::infractions(),
                commands::settings(),
                commands::sweep(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    // Log the start of command execution
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    // Log the end of command execution
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    // Log the error using our logging system
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(app)
            })
        })
        .build();

    // GUILD_MODERATION feeds the audit-log observer.
    let intents = GatewayIntents::non_privileged();
    // serenity's builder requires an owned `Http`; it cannot share the Arc above.
    let mut client = serenity::ClientBuilder::new_with_http(Http::new(&token), intents)
        .event_handler(handlers::Handler::new(observer))
        .framework(framework)
        .await
        .expect("Failed to create client");

    // Ctrl-C drains the gateway so the shutdown path below runs.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    if let Err(err) = client.start().await {
        eprintln!("Error starting the bot: {}", err);
    }

    // Stop the sweep and flush the stores before exiting.
    let _ = sweep.send(SweepRequest::Shutdown).await;
    data.save().await?;
    info!("Stores saved, goodbye");

    Ok(())
}

fn main() {
    // Run the async main function
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async_main());

    // Handle any errors that occurred during execution
    if let Err(err) = result {
        eprintln!("Error: {}", err);
    }
}
