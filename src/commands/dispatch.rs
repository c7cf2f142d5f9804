use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::bulker::Bulkers;
use crate::commands::parse::parse_command;
use crate::commands::{
    ChatCommands, CommandData, SlashCommandData, SlashCommands, UnknownCommandHandler,
};
use crate::platform::InboundMessage;

/// What happened to a dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing left after stripping the prefix and self-mentions
    Ignored,
    Handled,
    /// The handler returned an error or panicked
    Failed,
    /// No handler; the unknown-command message was sent
    UnknownReported,
    /// No handler; the fallback handler ran
    UnknownDelegated,
    /// No handler and nothing configured to deal with it
    Unknown,
}

/// Routes parsed commands to their registered handlers
pub struct Dispatcher {
    bot_id: u64,
    prefix: Option<String>,
    unknown_command_message: Option<String>,
    commands: ChatCommands,
    slash_commands: SlashCommands,
    unknown_handler: Option<Arc<dyn UnknownCommandHandler>>,
    replies: Arc<Bulkers>,
}

impl Dispatcher {
    pub fn new(bot_id: u64, commands: ChatCommands, replies: Arc<Bulkers>) -> Self {
        Self {
            bot_id,
            prefix: None,
            unknown_command_message: None,
            commands,
            slash_commands: SlashCommands::new(),
            unknown_handler: None,
            replies,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn with_unknown_command_message(mut self, message: Option<String>) -> Self {
        self.unknown_command_message = message;
        self
    }

    pub fn with_unknown_handler(mut self, handler: Arc<dyn UnknownCommandHandler>) -> Self {
        self.unknown_handler = Some(handler);
        self
    }

    pub fn with_slash_commands(mut self, slash_commands: SlashCommands) -> Self {
        self.slash_commands = slash_commands;
        self
    }

    pub fn bot_id(&self) -> u64 {
        self.bot_id
    }

    /// True if `text` would be picked up as a prefix command
    pub fn has_prefix(&self, text: &str) -> bool {
        self.prefix.as_deref().is_some_and(|p| text.starts_with(p))
    }

    /// Parse a message as a command and run its handler.
    ///
    /// `output_unknowns` asks for the unknown-command reply when no handler
    /// matches; `alt_content` replaces the message text (e.g. for auto-sent
    /// commands). Handler errors and panics end here.
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
        output_unknowns: bool,
        was_mention: bool,
        alt_content: Option<&str>,
    ) -> DispatchOutcome {
        let text = alt_content.unwrap_or(&message.content);
        let Some(parsed) = parse_command(text, self.prefix.as_deref(), self.bot_id) else {
            info!("Empty input, ignoring: {}", message.author_name);
            return DispatchOutcome::Ignored;
        };
        let name = parsed.name;
        let command = CommandData {
            message: message.clone(),
            raw_arguments: parsed.raw_arguments,
            cleaned_arguments: parsed.cleaned_arguments,
            was_bot_mention: was_mention,
        };
        info!(
            "Found input from ({}), in channel {}: {} {}",
            message.author_name,
            message.channel_id,
            name,
            command.cleaned_arguments.join(" ")
        );

        if let Some(handler) = self.commands.get(&name) {
            return match AssertUnwindSafe(handler.handle(command)).catch_unwind().await {
                Ok(Ok(())) => DispatchOutcome::Handled,
                Ok(Err(e)) => {
                    error!("Error while handling command '{}': {:#}", text, e);
                    DispatchOutcome::Failed
                }
                Err(_) => {
                    error!("Command handler panicked while handling '{}'", text);
                    DispatchOutcome::Failed
                }
            };
        }

        if output_unknowns {
            if let Some(reply) = &self.unknown_command_message {
                self.replies.send(message.channel_id, reply.clone());
                return DispatchOutcome::UnknownReported;
            }
        }

        match &self.unknown_handler {
            Some(fallback) => {
                match AssertUnwindSafe(fallback.handle(name, command)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Error in unknown-command handler for '{}': {:#}", text, e),
                    Err(_) => error!("Unknown-command handler panicked for '{}'", text),
                }
                DispatchOutcome::UnknownDelegated
            }
            None => DispatchOutcome::Unknown,
        }
    }

    /// Run a slash command. Unknown names get a short reply in the invoking channel.
    pub async fn dispatch_slash(&self, command: SlashCommandData) -> DispatchOutcome {
        let name = command.name.to_lowercase();
        info!(
            "Found slash command '{}' from user id {} in channel id {}, options: {:?}",
            name, command.user_id, command.channel_id, command.options
        );
        let Some(handler) = self.slash_commands.get(&name) else {
            warn!("Unknown slash command '{}'", name);
            self.replies.send(command.channel_id, "Unknown command.");
            return DispatchOutcome::UnknownReported;
        };
        match AssertUnwindSafe(handler.handle(command)).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                error!("Slash command '{}' execution errored: {:#}", name, e);
                DispatchOutcome::Failed
            }
            Err(_) => {
                error!("Slash command '{}' panicked", name);
                DispatchOutcome::Failed
            }
        }
    }
}
