mod bulker;
mod cache;
mod commands;
mod config;
mod platform;
mod router;
mod watchdog;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bulker::Bulkers;
use crate::cache::MessageCache;
use crate::commands::builtin::{builtin_slash_commands, did_you_mean, register_builtin_commands};
use crate::commands::dispatch::Dispatcher;
use crate::commands::ChatCommands;
use crate::config::{channel_key, Config};
use crate::platform::telegram::{self, TelegramHistory, TelegramSink};
use crate::platform::MessageSink;
use crate::router::{EventRouter, ReactionEvent};
use crate::watchdog::{ConnectionMonitor, ConnectionTracker, Watchdog};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,basebot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Usage: basebot [config.toml] [chat id to notify after a restart]
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let restart_channel = args
        .next()
        .map(|arg| {
            arg.parse::<i64>()
                .with_context(|| format!("Invalid restart chat ID: {}", arg))
        })
        .transpose()?
        .map(channel_key);

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Prefix: {:?}", config.commands.prefix());
    info!("  Cache size: {}", config.cache.size);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    info!("  Allowed chats: {:?}", config.general.allowed_channel_ids);

    let bot = teloxide::Bot::new(&config.telegram.bot_token);
    let identity = telegram::fetch_identity(&bot).await?;
    info!("Logged in as @{} ({})", identity.username, identity.id);

    let monitor = Arc::new(ConnectionMonitor::new());
    let sink: Arc<dyn MessageSink> = Arc::new(TelegramSink::new(bot.clone()));
    let bulkers = Arc::new(Bulkers::new(config.bulker.settings(), sink));
    let cache = Arc::new(
        MessageCache::new(config.cache.size, monitor.clone())
            .with_channel_sizes(config.cache.channel_sizes()?)
            .with_prefill_delay(config.cache.prefill_delay()),
    );

    let mut commands = ChatCommands::new();
    register_builtin_commands(&mut commands, bulkers.clone())?;
    let slash_commands = builtin_slash_commands(&commands, bulkers.clone())?;
    let fallback = did_you_mean(&commands, config.commands.prefix().as_deref(), bulkers.clone());
    info!("  Commands: {}", commands.names().join(", "));
    info!("  Bot commands: /{}", slash_commands.names().join(", /"));

    let dispatcher = Arc::new(
        Dispatcher::new(identity.id, commands, bulkers.clone())
            .with_prefix(config.commands.prefix())
            .with_unknown_command_message(config.commands.unknown_command_message())
            .with_unknown_handler(fallback)
            .with_slash_commands(slash_commands),
    );

    let reaction_cache = cache.clone();
    let log_reaction = move |reaction: &ReactionEvent| {
        match reaction_cache.try_get(reaction.channel_id, reaction.message_id) {
            Some(message) => info!(
                "Reaction {} by user {} on message {} from user {} ({} attachments): {}",
                reaction.emoji,
                reaction.user_id,
                reaction.message_id,
                message.sender_id,
                message.attachments.len(),
                message.text
            ),
            None => info!(
                "Reaction {} by user {} on uncached message {} in chat {}",
                reaction.emoji, reaction.user_id, reaction.message_id, reaction.channel_id as i64
            ),
        }
    };

    let config = Arc::new(config);
    let router = Arc::new(
        EventRouter::new(
            config,
            monitor.clone(),
            cache,
            dispatcher,
            bulkers,
            Arc::new(TelegramHistory),
        )
        .with_restart_channel(restart_channel)
        .with_reaction_hook(Arc::new(log_reaction)),
    );

    info!("Bot is starting...");
    telegram::run(bot, router, identity).await?;

    if monitor.connected_currently() {
        monitor.mark_disconnected();
    }
    monitor.stop_all_logic();
    info!("Bot stopped");

    Ok(())
}
