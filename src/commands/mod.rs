pub mod builtin;
pub mod dispatch;
pub mod parse;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::platform::InboundMessage;

/// All data related to one user command
#[derive(Debug, Clone)]
pub struct CommandData {
    /// The message that carried the command
    pub message: InboundMessage,
    /// Arguments after the command word, split by spaces. Keeps mentions of other users.
    pub raw_arguments: Vec<String>,
    /// Arguments after the command word with every mention removed
    pub cleaned_arguments: Vec<String>,
    /// True for "@Bot command", false for prefix invocations like "!command"
    pub was_bot_mention: bool,
}

impl CommandData {
    pub fn channel_id(&self) -> u64 {
        self.message.channel_id
    }
}

/// A platform-native slash command invocation
#[derive(Debug, Clone)]
pub struct SlashCommandData {
    pub channel_id: u64,
    pub user_id: u64,
    pub name: String,
    pub options: Vec<String>,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: CommandData) -> Result<()>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, command: CommandData) -> Result<()> {
        self(command).await
    }
}

#[async_trait]
pub trait SlashCommandHandler: Send + Sync {
    async fn handle(&self, command: SlashCommandData) -> Result<()>;
}

#[async_trait]
impl<F, Fut> SlashCommandHandler for F
where
    F: Fn(SlashCommandData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, command: SlashCommandData) -> Result<()> {
        self(command).await
    }
}

/// Fallback for command names nobody registered (e.g. special info output)
#[async_trait]
pub trait UnknownCommandHandler: Send + Sync {
    async fn handle(&self, name: String, command: CommandData) -> Result<()>;
}

#[async_trait]
impl<F, Fut> UnknownCommandHandler for F
where
    F: Fn(String, CommandData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, name: String, command: CommandData) -> Result<()> {
        self(name, command).await
    }
}

/// Name → handler table. Built once at startup, read-only afterwards.
pub struct CommandRegistry<H: ?Sized> {
    handlers: HashMap<String, Arc<H>>,
}

pub type ChatCommands = CommandRegistry<dyn CommandHandler>;
pub type SlashCommands = CommandRegistry<dyn SlashCommandHandler>;

impl<H: ?Sized> CommandRegistry<H> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a name and any number of aliases.
    ///
    /// Names are case-insensitive. A name that is already taken is an error,
    /// and nothing from this call is registered in that case.
    pub fn register(&mut self, handler: Arc<H>, names: &[&str]) -> Result<()> {
        if names.is_empty() {
            bail!("Command registered without a name");
        }
        let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        for (i, name) in lowered.iter().enumerate() {
            if name.is_empty() || name.contains(' ') {
                bail!("Invalid command name: {:?}", name);
            }
            if self.handlers.contains_key(name) || lowered[..i].contains(name) {
                bail!("Duplicate command name: {}", name);
            }
        }
        for name in lowered {
            debug!("Registered command: {}", name);
            self.handlers.insert(name, handler.clone());
        }
        Ok(())
    }

    /// Exact lookup; callers pass the lower-cased name.
    pub fn get(&self, name: &str) -> Option<Arc<H>> {
        self.handlers.get(name).cloned()
    }

    /// All registered names and aliases, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H: ?Sized> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn CommandHandler> {
        Arc::new(|_command: CommandData| async { anyhow::Ok(()) })
    }

    #[test]
    fn test_register_name_and_aliases() {
        let mut commands = ChatCommands::new();
        commands.register(noop(), &["Ping", "p"]).unwrap();
        assert!(commands.get("ping").is_some());
        assert!(commands.get("p").is_some());
        assert!(commands.get("Ping").is_none());
        assert_eq!(commands.names(), vec!["p", "ping"]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut commands = ChatCommands::new();
        commands.register(noop(), &["help"]).unwrap();
        let err = commands.register(noop(), &["info", "HELP"]).unwrap_err();
        assert!(err.to_string().contains("Duplicate command name: help"));
        // The failed call registered nothing.
        assert!(commands.get("info").is_none());
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_duplicate_alias_within_one_call() {
        let mut commands = ChatCommands::new();
        assert!(commands.register(noop(), &["x", "X"]).is_err());
        assert!(commands.is_empty());
    }

    #[test]
    fn test_invalid_names() {
        let mut commands = ChatCommands::new();
        assert!(commands.register(noop(), &[]).is_err());
        assert!(commands.register(noop(), &[""]).is_err());
        assert!(commands.register(noop(), &["two words"]).is_err());
    }

    #[tokio::test]
    async fn test_slash_registry_invokes_closure() {
        let mut slash = SlashCommands::new();
        slash
            .register(
                Arc::new(|command: SlashCommandData| async move {
                    assert_eq!(command.options, vec!["a".to_string()]);
                    anyhow::Ok(())
                }),
                &["Roll"],
            )
            .unwrap();
        let handler = slash.get("roll").unwrap();
        handler
            .handle(SlashCommandData {
                channel_id: 1,
                user_id: 2,
                name: "roll".to_string(),
                options: vec!["a".to_string()],
            })
            .await
            .unwrap();
    }
}
