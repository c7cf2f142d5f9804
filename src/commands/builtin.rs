use std::sync::Arc;

use anyhow::Result;

use crate::bulker::Bulkers;
use crate::commands::{
    ChatCommands, CommandData, SlashCommandData, SlashCommands, UnknownCommandHandler,
};

const HELP_NAMES: [&str; 2] = ["help", "commands"];

fn listing(names: &[String]) -> String {
    format!("Available commands: {}", names.join(", "))
}

/// Register the commands every bot gets: `ping` and `help` (alias `commands`).
///
/// Call this after all other commands so `help` can list them.
pub fn register_builtin_commands(commands: &mut ChatCommands, replies: Arc<Bulkers>) -> Result<()> {
    let ping_replies = replies.clone();
    commands.register(
        Arc::new(move |command: CommandData| {
            let replies = ping_replies.clone();
            async move {
                replies.send(command.channel_id(), "Pong!");
                anyhow::Ok(())
            }
        }),
        &["ping"],
    )?;

    let mut names = commands.names();
    names.extend(HELP_NAMES.iter().map(|n| n.to_string()));
    names.sort();
    let listing = listing(&names);
    commands.register(
        Arc::new(move |command: CommandData| {
            let replies = replies.clone();
            let listing = listing.clone();
            async move {
                replies.send(command.channel_id(), listing);
                anyhow::Ok(())
            }
        }),
        &HELP_NAMES,
    )?;
    Ok(())
}

/// Telegram-native `/start`, `/help` and `/ping`. `/start` and `/help` list the
/// chat commands, so build this once they are all registered.
pub fn builtin_slash_commands(commands: &ChatCommands, replies: Arc<Bulkers>) -> Result<SlashCommands> {
    let mut slash = SlashCommands::new();
    let listing = listing(&commands.names());
    let help_replies = replies.clone();
    slash.register(
        Arc::new(move |command: SlashCommandData| {
            let replies = help_replies.clone();
            let listing = listing.clone();
            async move {
                replies.send(command.channel_id, listing);
                anyhow::Ok(())
            }
        }),
        &["start", "help"],
    )?;
    slash.register(
        Arc::new(move |command: SlashCommandData| {
            let replies = replies.clone();
            async move {
                replies.send(command.channel_id, "Pong!");
                anyhow::Ok(())
            }
        }),
        &["ping"],
    )?;
    Ok(slash)
}

/// Fallback for unknown names: suggest the closest registered command, with
/// the same arguments, when one is close enough. Stays quiet otherwise.
pub fn did_you_mean(
    commands: &ChatCommands,
    prefix: Option<&str>,
    replies: Arc<Bulkers>,
) -> Arc<dyn UnknownCommandHandler> {
    let names = commands.names();
    let prefix = prefix.unwrap_or_default().to_string();
    Arc::new(move |name: String, command: CommandData| {
        let suggestion = closest_command(&name, &names).map(|candidate| {
            let lead = if command.was_bot_mention { "" } else { prefix.as_str() };
            let reissued = std::iter::once(candidate)
                .chain(command.raw_arguments.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            format!("Unknown command `{}`. Did you mean `{}{}`?", name, lead, reissued)
        });
        let replies = replies.clone();
        async move {
            if let Some(text) = suggestion {
                replies.send(command.channel_id(), text);
            }
            anyhow::Ok(())
        }
    })
}

fn closest_command<'a>(name: &str, names: &'a [String]) -> Option<&'a str> {
    let (candidate, distance) = names
        .iter()
        .map(|candidate| (candidate.as_str(), levenshtein_distance(name, candidate)))
        .min_by_key(|(_, distance)| *distance)?;
    let threshold = match name.chars().count() {
        0..=4 => 1,
        5..=8 => 2,
        _ => 3,
    };
    (distance <= threshold).then_some(candidate)
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, left) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, right) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(left != *right);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
