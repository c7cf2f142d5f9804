pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A message received from the chat platform
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform message ID, unique within its channel
    pub id: u64,
    /// Chat/channel the message was posted in
    pub channel_id: u64,
    /// Author's user ID
    pub author_id: u64,
    /// Display name of the author, for logging
    pub author_name: String,
    /// True when the author is a bot account
    pub author_is_bot: bool,
    /// True when the message arrived in a one-to-one chat
    pub is_direct: bool,
    /// The message text
    pub content: String,
    /// Attachment URLs, in the order the platform lists them
    pub attachments: Vec<String>,
}

/// A historical message returned by a [`HistorySource`]
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub id: u64,
    pub author_id: u64,
    pub content: String,
    pub attachments: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A channel the bot can read history from
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: u64,
    pub name: String,
}

/// Outbound side of the platform: deliver a text payload to a channel.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_text(&self, channel_id: u64, text: &str) -> Result<()>;
}

/// Bulk history access used to prefill the message cache.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Channels whose history should be loaded
    async fn channels(&self) -> Result<Vec<ChannelInfo>>;

    /// Up to `limit` recent messages of a channel, in any order
    async fn fetch_messages(&self, channel_id: u64, limit: usize) -> Result<Vec<HistoryMessage>>;
}
