use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::platform::MessageSink;

/// Timing and size limits for outbound coalescing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkerSettings {
    /// How long queued fragments wait before a scheduled flush
    pub delay: Duration,
    /// A send after this much silence goes out immediately
    pub quiet_interval: Duration,
    /// Largest payload built from several fragments
    pub max_payload_len: usize,
}

impl Default for BulkerSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(400),
            quiet_interval: Duration::from_millis(1500),
            max_payload_len: 1800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    /// Nothing queued, no timer armed
    Idle,
    /// Fragments queued, a flush timer is armed
    ScheduledWait,
}

#[derive(Debug)]
struct BulkerQueue {
    pending: VecDeque<String>,
    last_sent: Option<Instant>,
    state: FlushState,
}

/// Coalesces many small messages to one channel into fewer sends.
///
/// Payloads are handed to a per-channel delivery task, so at most one network
/// call per channel is in flight and payloads arrive in the order they were built.
pub struct MessageBulker {
    channel_id: u64,
    settings: BulkerSettings,
    queue: Mutex<BulkerQueue>,
    outbox: mpsc::UnboundedSender<String>,
}

impl MessageBulker {
    /// Create a bulker and spawn its delivery task. Must be called inside a Tokio runtime.
    pub fn new(channel_id: u64, settings: BulkerSettings, sink: Arc<dyn MessageSink>) -> Arc<Self> {
        let (outbox, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(channel_id, sink, rx));
        Arc::new(Self {
            channel_id,
            settings,
            queue: Mutex::new(BulkerQueue {
                pending: VecDeque::new(),
                last_sent: None,
                state: FlushState::Idle,
            }),
            outbox,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BulkerQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message, sending right away if the channel has been quiet.
    pub fn send(self: &Arc<Self>, text: impl Into<String>) {
        let text = text.into();
        let oversized = text.len() > self.settings.max_payload_len;
        let mut queue = self.lock();
        queue.pending.push_back(text);
        let quiet = queue
            .last_sent
            .map_or(true, |sent| sent.elapsed() > self.settings.quiet_interval);
        if queue.state == FlushState::Idle && (quiet || oversized) {
            self.flush(&mut queue);
        } else {
            self.schedule(&mut queue);
        }
    }

    fn schedule(self: &Arc<Self>, queue: &mut BulkerQueue) {
        if queue.state == FlushState::ScheduledWait {
            return;
        }
        queue.state = FlushState::ScheduledWait;
        let bulker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(bulker.settings.delay).await;
            let mut queue = bulker.lock();
            queue.state = FlushState::Idle;
            bulker.flush(&mut queue);
        });
    }

    /// Drain as many queued fragments as fit into one payload and hand it off.
    fn flush(self: &Arc<Self>, queue: &mut BulkerQueue) {
        let mut payload = String::new();
        while let Some(next) = queue.pending.front() {
            if !payload.is_empty() && payload.len() + 1 + next.len() > self.settings.max_payload_len {
                break;
            }
            if !payload.is_empty() {
                payload.push('\n');
            }
            payload.push_str(next);
            queue.pending.pop_front();
        }
        if !queue.pending.is_empty() {
            self.schedule(queue);
        }
        if payload.is_empty() {
            return;
        }
        queue.last_sent = Some(Instant::now());
        debug!(
            "Flushing {} chars to channel {} ({} fragments still queued)",
            payload.len(),
            self.channel_id,
            queue.pending.len()
        );
        if self.outbox.send(payload).is_err() {
            error!(
                "Delivery task for channel {} is gone, dropping payload",
                self.channel_id
            );
        }
    }
}

async fn deliver(
    channel_id: u64,
    sink: Arc<dyn MessageSink>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(payload) = rx.recv().await {
        if let Err(e) = sink.send_text(channel_id, &payload).await {
            error!(
                "MessageBulker encountered error while sending message to channel {}: {:#}",
                channel_id, e
            );
        }
    }
}

/// One [`MessageBulker`] per destination channel, created on first use.
pub struct Bulkers {
    settings: BulkerSettings,
    sink: Arc<dyn MessageSink>,
    bulkers: DashMap<u64, Arc<MessageBulker>>,
}

impl Bulkers {
    pub fn new(settings: BulkerSettings, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            settings,
            sink,
            bulkers: DashMap::new(),
        }
    }

    pub fn bulker(&self, channel_id: u64) -> Arc<MessageBulker> {
        self.bulkers
            .entry(channel_id)
            .or_insert_with(|| MessageBulker::new(channel_id, self.settings, self.sink.clone()))
            .value()
            .clone()
    }

    pub fn send(&self, channel_id: u64, text: impl Into<String>) {
        self.bulker(channel_id).send(text);
    }
}
