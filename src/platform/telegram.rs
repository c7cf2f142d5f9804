use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageReactionUpdated, ReactionType};
use tracing::{debug, info, warn};

use crate::commands::parse::self_mention;
use crate::commands::SlashCommandData;
use crate::config::channel_key;
use crate::platform::{ChannelInfo, HistoryMessage, HistorySource, InboundMessage, MessageSink};
use crate::router::{EventRouter, InboundEvent, ReactionEvent};

/// Telegram rejects messages over 4096 chars; leave some headroom
const TELEGRAM_MAX_LEN: usize = 4000;

/// Who the bot is logged in as
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
}

pub async fn fetch_identity(bot: &Bot) -> Result<BotIdentity> {
    let me = bot
        .get_me()
        .await
        .context("Failed to fetch bot identity from Telegram")?;
    Ok(BotIdentity {
        id: me.user.id.0,
        username: me.user.username.clone().unwrap_or_default(),
    })
}

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Rewrite Telegram's `@botname` mentions into `<@id>` form and drop the
/// `@botname` suffix from `/command@botname`, so the dispatcher sees one syntax.
///
/// A standalone mention loses any punctuation stuck to it ("@bot,") and the
/// whitespace after it becomes a single space, keeping it a separate token.
fn normalize_mentions(text: &str, identity: &BotIdentity) -> String {
    if identity.username.is_empty() {
        return text.to_string();
    }
    // Usernames are ASCII, so the lowered copy has the same byte offsets.
    let handle = format!("@{}", identity.username.to_ascii_lowercase());
    let lower = text.to_ascii_lowercase();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut search = 0;
    while let Some(found) = lower[search..].find(&handle) {
        let start = search + found;
        let end = start + handle.len();
        search = end;
        if text[end..].chars().next().is_some_and(is_word) {
            // Some longer username
            continue;
        }
        let token_start = text[..start]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map_or(0, |(i, c)| i + c.len_utf8());
        let token = &text[token_start..start];

        if token.is_empty() {
            out.push_str(&text[copied..start]);
            out.push_str(&self_mention(identity.id));
            let mut tail = end;
            while let Some(c) = text[tail..].chars().next().filter(|c| !c.is_whitespace()) {
                tail += c.len_utf8();
            }
            if let Some(c) = text[tail..].chars().next() {
                out.push(' ');
                tail += c.len_utf8();
            }
            copied = tail;
            search = tail;
        } else if token.starts_with('/') && !token.contains('@') {
            out.push_str(&text[copied..start]);
            copied = end;
        }
    }
    out.push_str(&text[copied..]);
    out
}

/// File IDs of the media a message carries, in a fixed order. Photos
/// contribute their largest size only.
fn attachments(msg: &Message) -> Vec<String> {
    let files = [
        msg.photo().and_then(|sizes| sizes.last()).map(|p| &p.file),
        msg.document().map(|d| &d.file),
        msg.animation().map(|a| &a.file),
        msg.video().map(|v| &v.file),
        msg.video_note().map(|v| &v.file),
        msg.audio().map(|a| &a.file),
        msg.voice().map(|v| &v.file),
        msg.sticker().map(|s| &s.file),
    ];
    let mut ids: Vec<String> = Vec::new();
    for file in files.into_iter().flatten() {
        let id = file.id.to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn to_inbound(msg: &Message, identity: &BotIdentity) -> Option<InboundMessage> {
    let user = msg.from.as_ref()?;
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    Some(InboundMessage {
        id: msg.id.0 as u64,
        channel_id: channel_key(msg.chat.id.0),
        author_id: user.id.0,
        author_name: user.first_name.clone(),
        author_is_bot: user.is_bot,
        is_direct: msg.chat.is_private(),
        content: normalize_mentions(text, identity),
        attachments: attachments(msg),
    })
}

/// `/name arg...` addressed to this bot. Commands still carrying an `@suffix`
/// after normalization belong to some other bot.
fn bot_command(message: &InboundMessage) -> Option<SlashCommandData> {
    if message.author_is_bot {
        return None;
    }
    let mut words = message.content.split_whitespace();
    let name = words.next()?.strip_prefix('/')?;
    if name.is_empty() || name.contains('@') {
        return None;
    }
    Some(SlashCommandData {
        channel_id: message.channel_id,
        user_id: message.author_id,
        name: name.to_lowercase(),
        options: words.map(str::to_string).collect(),
    })
}

fn reaction_label(reaction: &ReactionType) -> String {
    match reaction {
        ReactionType::Emoji { emoji } => emoji.clone(),
        ReactionType::CustomEmoji { custom_emoji_id } => custom_emoji_id.to_string(),
        ReactionType::Paid => "paid".to_string(),
    }
}

/// One event per reaction the user added in this update. Anonymous
/// (on behalf of a chat) reactions are skipped.
fn added_reactions(update: &MessageReactionUpdated) -> Vec<ReactionEvent> {
    let Some(user) = update.user() else {
        return Vec::new();
    };
    update
        .new_reaction
        .iter()
        .filter(|reaction| !update.old_reaction.contains(reaction))
        .map(|reaction| ReactionEvent {
            channel_id: channel_key(update.chat.id.0),
            message_id: update.message_id.0 as u64,
            user_id: user.id.0,
            user_is_bot: user.is_bot,
            emoji: reaction_label(reaction),
        })
        .collect()
}

/// Sends bulker payloads through the Bot API
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send_text(&self, channel_id: u64, text: &str) -> Result<()> {
        let chat_id = ChatId(channel_id as i64);
        for chunk in split_message(text, TELEGRAM_MAX_LEN) {
            self.bot
                .send_message(chat_id, chunk)
                .await
                .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
        }
        Ok(())
    }
}

/// The Bot API can neither enumerate chats nor read their history, so the
/// cache is filled from live updates only.
pub struct TelegramHistory;

#[async_trait]
impl HistorySource for TelegramHistory {
    async fn channels(&self) -> Result<Vec<ChannelInfo>> {
        debug!("Telegram exposes no chat list; nothing to prefill");
        Ok(Vec::new())
    }

    async fn fetch_messages(&self, channel_id: u64, _limit: usize) -> Result<Vec<HistoryMessage>> {
        debug!("No history available for chat {}", channel_id as i64);
        Ok(Vec::new())
    }
}

/// Run the Telegram update loop until Ctrl+C
pub async fn run(bot: Bot, router: Arc<EventRouter>, identity: BotIdentity) -> Result<()> {
    info!("Starting Telegram platform...");

    let identity = Arc::new(identity);
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_edited_message().endpoint(handle_edited_message))
        .branch(Update::filter_message_reaction_updated().endpoint(handle_reaction));

    // Long polling starts right away; treat that as the connection coming up.
    let ready_router = router.clone();
    tokio::spawn(async move {
        ready_router.handle(InboundEvent::Ready).await;
    });

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router, identity])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(
    msg: Message,
    router: Arc<EventRouter>,
    identity: Arc<BotIdentity>,
) -> ResponseResult<()> {
    let Some(inbound) = to_inbound(&msg, &identity) else {
        return Ok(());
    };
    let command = bot_command(&inbound);
    router.handle(InboundEvent::MessageCreated(inbound)).await;
    if let Some(command) = command {
        router.handle(InboundEvent::SlashCommand(command)).await;
    }
    Ok(())
}

async fn handle_edited_message(
    msg: Message,
    router: Arc<EventRouter>,
    identity: Arc<BotIdentity>,
) -> ResponseResult<()> {
    if let Some(inbound) = to_inbound(&msg, &identity) {
        router.handle(InboundEvent::MessageUpdated(inbound)).await;
    }
    Ok(())
}

async fn handle_reaction(
    update: MessageReactionUpdated,
    router: Arc<EventRouter>,
) -> ResponseResult<()> {
    for reaction in added_reactions(&update) {
        router.handle(InboundEvent::ReactionAdded(reaction)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> BotIdentity {
        BotIdentity {
            id: 4242,
            username: "base_bot".to_string(),
        }
    }

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage {
            id: 1,
            channel_id: 9,
            author_id: 42,
            author_name: "Ann".to_string(),
            author_is_bot: false,
            is_direct: false,
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_split_short_message_untouched() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
        assert_eq!(chunks.concat(), "aaaa\nbbbb\ncccc");
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_username_mention_becomes_self_mention() {
        let me = identity();
        assert_eq!(normalize_mentions("@base_bot ping now", &me), "<@4242> ping now");
        assert_eq!(normalize_mentions("@Base_Bot ping", &me), "<@4242> ping");
        assert_eq!(normalize_mentions("hey @base_bot", &me), "hey <@4242>");
        assert_eq!(normalize_mentions("@someone_else hi", &me), "@someone_else hi");
    }

    #[test]
    fn test_mention_with_punctuation_or_newline() {
        let me = identity();
        assert_eq!(normalize_mentions("@base_bot, ping", &me), "<@4242> ping");
        assert_eq!(normalize_mentions("@base_bot:", &me), "<@4242>");
        assert_eq!(normalize_mentions("@base_bot\nping", &me), "<@4242> ping");
    }

    #[test]
    fn test_longer_usernames_and_emails_are_left_alone() {
        let me = identity();
        assert_eq!(normalize_mentions("@base_botty hi", &me), "@base_botty hi");
        assert_eq!(normalize_mentions("mail@base_bot", &me), "mail@base_bot");
    }

    #[test]
    fn test_command_suffix_is_stripped() {
        let me = identity();
        assert_eq!(normalize_mentions("/ping@base_bot x", &me), "/ping x");
        assert_eq!(normalize_mentions("/ping@Base_Bot", &me), "/ping");
        assert_eq!(normalize_mentions("/ping@other_bot", &me), "/ping@other_bot");
    }

    #[test]
    fn test_no_username_leaves_text_alone() {
        let anonymous = BotIdentity {
            id: 1,
            username: String::new(),
        };
        assert_eq!(normalize_mentions("@x /y", &anonymous), "@x /y");
    }

    #[test]
    fn test_bot_command_extraction() {
        let command = bot_command(&inbound("/Roll 2d6  fast")).unwrap();
        assert_eq!(command.name, "roll");
        assert_eq!(command.options, vec!["2d6".to_string(), "fast".to_string()]);
        assert_eq!((command.channel_id, command.user_id), (9, 42));

        assert!(bot_command(&inbound("/roll@other_bot")).is_none());
        assert!(bot_command(&inbound("/")).is_none());
        assert!(bot_command(&inbound("!roll")).is_none());
        let mut from_bot = inbound("/roll");
        from_bot.author_is_bot = true;
        assert!(bot_command(&from_bot).is_none());
    }

    #[test]
    fn test_captioned_photo_keeps_caption_and_largest_file() {
        let msg: Message = serde_json::from_str(
            r#"{
                "message_id": 7,
                "from": {"id": 42, "is_bot": false, "first_name": "Ann"},
                "chat": {"id": 42, "first_name": "Ann", "type": "private"},
                "date": 1700000000,
                "caption": "look @base_bot",
                "photo": [
                    {"file_id": "small", "file_unique_id": "s", "file_size": 100, "width": 90, "height": 90},
                    {"file_id": "large", "file_unique_id": "l", "file_size": 900, "width": 800, "height": 600}
                ]
            }"#,
        )
        .unwrap();
        let inbound = to_inbound(&msg, &identity()).unwrap();
        assert_eq!(inbound.id, 7);
        assert_eq!(inbound.channel_id, channel_key(42));
        assert_eq!(inbound.author_id, 42);
        assert!(inbound.is_direct);
        assert_eq!(inbound.content, "look <@4242>");
        assert_eq!(inbound.attachments, vec!["large".to_string()]);
    }

    #[test]
    fn test_text_message_has_no_attachments() {
        let msg: Message = serde_json::from_str(
            r#"{
                "message_id": 8,
                "from": {"id": 42, "is_bot": false, "first_name": "Ann"},
                "chat": {"id": -100123, "title": "Group", "type": "supergroup"},
                "date": 1700000000,
                "text": "!ping"
            }"#,
        )
        .unwrap();
        let inbound = to_inbound(&msg, &identity()).unwrap();
        assert!(inbound.attachments.is_empty());
        assert!(!inbound.is_direct);
        assert_eq!(inbound.channel_id, channel_key(-100123));
    }

    #[test]
    fn test_only_added_reactions_become_events() {
        let update: MessageReactionUpdated = serde_json::from_str(
            r#"{
                "chat": {"id": -100123, "title": "Group", "type": "supergroup"},
                "message_id": 35,
                "user": {"id": 42, "is_bot": false, "first_name": "Ann"},
                "date": 1721306082,
                "old_reaction": [{"type": "emoji", "emoji": "👍"}],
                "new_reaction": [{"type": "emoji", "emoji": "👍"}, {"type": "emoji", "emoji": "🔥"}]
            }"#,
        )
        .unwrap();
        let events = added_reactions(&update);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].emoji, "🔥");
        assert_eq!(events[0].channel_id, channel_key(-100123));
        assert_eq!(events[0].message_id, 35);
        assert_eq!(events[0].user_id, 42);
        assert!(!events[0].user_is_bot);
    }
}
