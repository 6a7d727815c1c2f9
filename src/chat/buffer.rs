//! Per-channel bounded message log with time-window observation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::message::{normalize_channel, ChatMessage};

#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Messages kept per channel; oldest are evicted first.
    pub capacity: usize,
    /// How often an observer checks for newly recorded messages.
    pub poll_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Entries are tagged with a buffer-wide sequence number so observers can
/// resume after eviction without re-reading what they have seen. The counter
/// outlives channel removal, so a cursor never points past a re-created log.
#[derive(Default)]
struct Logs {
    channels: HashMap<String, VecDeque<(u64, ChatMessage)>>,
    next_seq: u64,
}

pub struct MessageBuffer {
    config: BufferConfig,
    logs: RwLock<Logs>,
}

impl MessageBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            logs: RwLock::new(Logs::default()),
        }
    }

    /// Append to a channel's log, evicting the oldest entries past capacity.
    pub async fn record(&self, message: ChatMessage) {
        let channel = normalize_channel(&message.channel);
        let mut logs = self.logs.write().await;
        let seq = logs.next_seq;
        logs.next_seq += 1;
        let log = logs.channels.entry(channel).or_default();
        log.push_back((seq, message));
        while log.len() > self.config.capacity {
            log.pop_front();
        }
    }

    /// Collect messages whose timestamps fall in `[since, since + duration]`,
    /// waiting until that window has elapsed in real time.
    pub async fn observe(
        &self,
        channel: &str,
        since: DateTime<Utc>,
        duration: Duration,
    ) -> Vec<ChatMessage> {
        let channel = normalize_channel(channel);
        let until = since
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let deadline = Instant::now() + duration;
        let in_window = |m: &ChatMessage| m.timestamp >= since && m.timestamp <= until;

        let mut collected = Vec::new();
        let mut cursor = 0u64;
        loop {
            cursor = self
                .collect_after(&channel, cursor, &in_window, &mut collected)
                .await;

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.config.poll_interval.min(deadline - now);
            tokio::time::sleep(wait).await;
        }

        debug!(
            "Observed {} messages in #{} over {:?}",
            collected.len(),
            channel,
            duration
        );
        collected
    }

    /// Append entries with sequence >= `cursor` that pass `filter`.
    /// Returns the cursor to resume from.
    async fn collect_after(
        &self,
        channel: &str,
        cursor: u64,
        filter: &impl Fn(&ChatMessage) -> bool,
        out: &mut Vec<ChatMessage>,
    ) -> u64 {
        let logs = self.logs.read().await;
        if let Some(log) = logs.channels.get(channel) {
            out.extend(
                log.iter()
                    .filter(|(seq, m)| *seq >= cursor && filter(m))
                    .map(|(_, m)| m.clone()),
            );
        }
        logs.next_seq
    }

    /// The newest `limit` messages for a channel, oldest first.
    pub async fn recent(&self, channel: &str, limit: usize) -> Vec<ChatMessage> {
        let logs = self.logs.read().await;
        logs.channels
            .get(&normalize_channel(channel))
            .map(|log| {
                let skip = log.len().saturating_sub(limit);
                log.iter().skip(skip).map(|(_, m)| m.clone()).collect()
            })
            .unwrap_or_default()
    }

    /// Everything currently retained for a channel.
    pub async fn snapshot(&self, channel: &str) -> Vec<ChatMessage> {
        self.recent(channel, usize::MAX).await
    }

    pub async fn remove_channel(&self, channel: &str) {
        self.logs
            .write()
            .await
            .channels
            .remove(&normalize_channel(channel));
    }

    pub async fn len(&self, channel: &str) -> usize {
        self.logs
            .read()
            .await
            .channels
            .get(&normalize_channel(channel))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Single writer task draining the connection's inbound channel.
    pub fn spawn_writer(self: &Arc<Self>, mut inbound: mpsc::Receiver<ChatMessage>) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                buffer.record(message).await;
            }
            debug!("Message buffer writer stopped");
        })
    }
}
