use std::sync::Arc;

use tracing::{debug, info};

use crate::bulker::Bulkers;
use crate::cache::MessageCache;
use crate::commands::dispatch::{DispatchOutcome, Dispatcher};
use crate::commands::parse::mentions_user;
use crate::commands::SlashCommandData;
use crate::config::Config;
use crate::platform::{HistorySource, InboundMessage};
use crate::watchdog::{ConnectionTracker, Watchdog};

/// A reaction added to a message
#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub channel_id: u64,
    pub message_id: u64,
    pub user_id: u64,
    pub user_is_bot: bool,
    pub emoji: String,
}

/// Everything the platform adapter can hand to the router
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// The platform connection is up (first time or after a reconnect)
    Ready,
    MessageCreated(InboundMessage),
    MessageUpdated(InboundMessage),
    ReactionAdded(ReactionEvent),
    SlashCommand(SlashCommandData),
}

pub type ReactionHook = Arc<dyn Fn(&ReactionEvent) + Send + Sync>;

/// Glue between the platform event feed and the cache, dispatcher and bulkers
pub struct EventRouter {
    config: Arc<Config>,
    monitor: Arc<dyn ConnectionTracker>,
    cache: Arc<MessageCache>,
    dispatcher: Arc<Dispatcher>,
    bulkers: Arc<Bulkers>,
    history: Arc<dyn HistorySource>,
    restart_channel: Option<u64>,
    reaction_hook: Option<ReactionHook>,
}

impl EventRouter {
    pub fn new(
        config: Arc<Config>,
        monitor: Arc<dyn ConnectionTracker>,
        cache: Arc<MessageCache>,
        dispatcher: Arc<Dispatcher>,
        bulkers: Arc<Bulkers>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        Self {
            config,
            monitor,
            cache,
            dispatcher,
            bulkers,
            history,
            restart_channel: None,
            reaction_hook: None,
        }
    }

    /// Channel that gets a notice once the first connection is up
    pub fn with_restart_channel(mut self, channel_id: Option<u64>) -> Self {
        self.restart_channel = channel_id;
        self
    }

    pub fn with_reaction_hook(mut self, hook: ReactionHook) -> Self {
        self.reaction_hook = Some(hook);
        self
    }

    #[cfg(test)]
    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub async fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::Ready => self.on_ready().await,
            InboundEvent::MessageCreated(message) => {
                self.on_message_created(&message).await;
            }
            InboundEvent::MessageUpdated(message) => self.on_message_updated(&message),
            InboundEvent::ReactionAdded(reaction) => self.on_reaction_added(&reaction),
            InboundEvent::SlashCommand(command) => {
                self.on_slash_command(command).await;
            }
        }
    }

    async fn on_ready(&self) {
        info!("Bot declared ready...");
        if self.monitor.should_stop_all_logic() {
            info!("But bot is already dead.");
            return;
        }
        self.monitor.mark_connected();
        if self.monitor.connected_once() {
            info!("But bot was connected before, so just refill the cache.");
            if self.config.cache.ensure_caching {
                self.cache.prefill(self.history.as_ref()).await;
            }
            return;
        }
        if let Some(channel_id) = self.restart_channel {
            info!("Restarted as per request, notifying channel {}", channel_id);
            self.bulkers.send(channel_id, "Connected and ready!");
        }
        self.monitor.mark_connected_once();
        if self.config.cache.ensure_caching {
            info!("Filling cache...");
            self.cache.prefill(self.history.as_ref()).await;
        }
    }

    /// Cache a new message and dispatch it if it is addressed to the bot.
    /// Returns the dispatch outcome when the message was treated as a command.
    pub async fn on_message_created(&self, message: &InboundMessage) -> Option<DispatchOutcome> {
        if self.monitor.should_stop_all_logic() {
            return None;
        }
        if message.is_direct && !self.config.general.allow_direct_messages {
            return None;
        }
        self.cache.cache_message(
            message.channel_id,
            message.id,
            message.author_id,
            &message.content,
            &message.attachments,
        );

        let bot_id = self.dispatcher.bot_id();
        if message.author_id == bot_id || message.author_is_bot {
            return None;
        }
        if !self
            .config
            .should_pay_attention(message.channel_id, message.author_id)
        {
            info!(
                "Refused message from ({}): (Non-whitelisted channel: {}): {}",
                message.author_name, message.channel_id, message.content
            );
            return None;
        }

        let mentioned = mentions_user(&message.content, bot_id);
        if !mentioned && !self.dispatcher.has_prefix(&message.content) {
            return None;
        }
        info!(
            "Parsing message from ({}), in channel {}: {}",
            message.author_name, message.channel_id, message.content
        );
        Some(
            self.dispatcher
                .dispatch(message, mentioned, mentioned, None)
                .await,
        )
    }

    /// Run a slash command unless the stop flag or the allow-lists say otherwise.
    pub async fn on_slash_command(&self, command: SlashCommandData) -> Option<DispatchOutcome> {
        if self.monitor.should_stop_all_logic() {
            return None;
        }
        if !self
            .config
            .should_pay_attention(command.channel_id, command.user_id)
        {
            info!(
                "Refused slash command '{}' from user {} in channel {}",
                command.name, command.user_id, command.channel_id
            );
            return None;
        }
        Some(self.dispatcher.dispatch_slash(command).await)
    }

    pub fn on_message_updated(&self, message: &InboundMessage) {
        if self.monitor.should_stop_all_logic() {
            return;
        }
        if message.is_direct && !self.config.general.allow_direct_messages {
            return;
        }
        if let Some(previous) = self.cache.try_get(message.channel_id, message.id) {
            if previous.text != message.content {
                debug!(
                    "Message {} in channel {} edited by {}: {:?} -> {:?}",
                    message.id, message.channel_id, message.author_name, previous.text, message.content
                );
            }
        }
        self.cache.cache_message(
            message.channel_id,
            message.id,
            message.author_id,
            &message.content,
            &message.attachments,
        );
    }

    pub fn on_reaction_added(&self, reaction: &ReactionEvent) {
        if self.monitor.should_stop_all_logic() {
            return;
        }
        if reaction.user_id == self.dispatcher.bot_id() || reaction.user_is_bot {
            return;
        }
        if let Some(hook) = &self.reaction_hook {
            hook(reaction);
        }
    }
}
