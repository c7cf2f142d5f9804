use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::platform::{ChannelInfo, HistorySource};
use crate::watchdog::Watchdog;

/// Channels whose bound exceeds this get a quick partial pass before the full prefill.
const INITIAL_PASS_THRESHOLD: usize = 150;

/// How many messages the quick partial pass fetches per channel.
const INITIAL_PASS_SIZE: usize = 50;

/// A single cached message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub sender_id: u64,
    pub text: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Default)]
struct ChannelCacheInner {
    /// Cached IDs in the order they were first seen, oldest at the front
    ids_in_sent_order: VecDeque<u64>,
    messages: HashMap<u64, CachedMessage>,
}

/// Bounded message cache for one channel.
///
/// Every upsert is a single critical section, so the eviction queue and the
/// message map always hold exactly the same set of IDs between calls.
#[derive(Debug)]
pub struct ChannelCache {
    size: usize,
    inner: Mutex<ChannelCacheInner>,
}

impl ChannelCache {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            inner: Mutex::new(ChannelCacheInner {
                ids_in_sent_order: VecDeque::with_capacity(size.min(4096)),
                messages: HashMap::with_capacity(size.min(4096)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelCacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a message.
    ///
    /// Replacing keeps the message's original position in the eviction order.
    pub fn insert(&self, id: u64, message: CachedMessage) {
        if self.size == 0 {
            return;
        }
        let mut inner = self.lock();
        if let Some(existing) = inner.messages.get_mut(&id) {
            *existing = message;
            return;
        }
        while inner.ids_in_sent_order.len() >= self.size {
            match inner.ids_in_sent_order.pop_front() {
                Some(evicted) => {
                    inner.messages.remove(&evicted);
                }
                None => break,
            }
        }
        inner.ids_in_sent_order.push_back(id);
        inner.messages.insert(id, message);
    }

    pub fn get(&self, id: u64) -> Option<CachedMessage> {
        self.lock().messages.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// Cached IDs, oldest first
    #[cfg(test)]
    pub fn ids(&self) -> Vec<u64> {
        self.lock().ids_in_sent_order.iter().copied().collect()
    }
}

/// Registry of per-channel caches, created lazily on first use.
pub struct MessageCache {
    default_size: usize,
    channel_sizes: HashMap<u64, usize>,
    prefill_delay: Duration,
    channels: DashMap<u64, Arc<ChannelCache>>,
    watchdog: Arc<dyn Watchdog>,
}

impl MessageCache {
    pub fn new(default_size: usize, watchdog: Arc<dyn Watchdog>) -> Self {
        Self {
            default_size,
            channel_sizes: HashMap::new(),
            prefill_delay: Duration::ZERO,
            channels: DashMap::new(),
            watchdog,
        }
    }

    /// Override the size bound for specific channels
    pub fn with_channel_sizes(mut self, channel_sizes: HashMap<u64, usize>) -> Self {
        self.channel_sizes = channel_sizes;
        self
    }

    /// Pause between channel fetches during prefill, to stay under rate limits
    pub fn with_prefill_delay(mut self, delay: Duration) -> Self {
        self.prefill_delay = delay;
        self
    }

    /// Size bound that applies to a channel
    pub fn size_for(&self, channel_id: u64) -> usize {
        self.channel_sizes
            .get(&channel_id)
            .copied()
            .unwrap_or(self.default_size)
    }

    /// Get or create the cache for a channel. Concurrent callers for the same
    /// channel always receive the same instance.
    pub fn channel(&self, channel_id: u64) -> Arc<ChannelCache> {
        self.channels
            .entry(channel_id)
            .or_insert_with(|| Arc::new(ChannelCache::new(self.size_for(channel_id))))
            .value()
            .clone()
    }

    pub fn cache_message(
        &self,
        channel_id: u64,
        id: u64,
        sender_id: u64,
        text: &str,
        attachments: &[String],
    ) {
        if self.size_for(channel_id) == 0 {
            return;
        }
        self.channel(channel_id).insert(
            id,
            CachedMessage {
                sender_id,
                text: text.to_string(),
                attachments: attachments.to_vec(),
            },
        );
    }

    pub fn try_get(&self, channel_id: u64, id: u64) -> Option<CachedMessage> {
        self.channels.get(&channel_id)?.get(id)
    }

    /// Load recent history for every channel the source knows about.
    ///
    /// Stops between channels (and between passes) as soon as the watchdog
    /// asks for it; whatever was loaded up to that point stays cached.
    pub async fn prefill(&self, history: &dyn HistorySource) {
        let channels = match history.channels().await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Cache pre-fill skipped, could not list channels: {:#}", e);
                return;
            }
        };
        let channels: Vec<ChannelInfo> = channels
            .into_iter()
            .filter(|c| self.size_for(c.id) > 0)
            .collect();
        if channels.is_empty() {
            return;
        }

        let large: Vec<ChannelInfo> = channels
            .iter()
            .filter(|c| self.size_for(c.id) > INITIAL_PASS_THRESHOLD)
            .cloned()
            .collect();
        if !large.is_empty() {
            info!("Performing initial cache pre-fill pass");
            if !self.prefill_pass(history, &large, Some(INITIAL_PASS_SIZE)).await {
                return;
            }
        }

        info!("Performing full cache pre-fill");
        if self.prefill_pass(history, &channels, None).await {
            info!("Cache pre-fill complete");
        }
    }

    /// Returns false if the pass was cut short by the watchdog.
    async fn prefill_pass(
        &self,
        history: &dyn HistorySource,
        channels: &[ChannelInfo],
        limit: Option<usize>,
    ) -> bool {
        for channel in channels {
            if self.watchdog.should_stop_all_logic() {
                info!("Cache pre-fill aborted");
                return false;
            }
            let size = self.size_for(channel.id);
            let amount = limit.map_or(size, |l| l.min(size));
            match history.fetch_messages(channel.id, amount).await {
                Ok(mut messages) => {
                    messages.sort_by_key(|m| m.timestamp);
                    let cache = self.channel(channel.id);
                    for message in messages {
                        cache.insert(
                            message.id,
                            CachedMessage {
                                sender_id: message.author_id,
                                text: message.content,
                                attachments: message.attachments,
                            },
                        );
                    }
                    info!(
                        "Completed cache prefill for channel {} ({}) with {} messages stored",
                        channel.id,
                        channel.name,
                        cache.len()
                    );
                }
                Err(e) => {
                    let text = format!("{:#}", e);
                    if text.to_lowercase().contains("forbidden") || text.contains("Missing Access")
                    {
                        warn!(
                            "Error while prefilling cache in channel {} ({}): no message access.",
                            channel.id, channel.name
                        );
                    } else {
                        warn!(
                            "Error while prefilling cache in channel {} ({}): {}",
                            channel.id, channel.name, text
                        );
                    }
                }
            }
            if !self.prefill_delay.is_zero() {
                tokio::time::sleep(self.prefill_delay).await;
            }
        }
        true
    }
}
