//! Public chat facade: observe a channel for a while, send rate-limited
//! messages, and report connection and queue health.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::buffer::{BufferConfig, MessageBuffer};
use super::connection::{ChatConnection, ConnectionConfig, ConnectionHealth};
use super::error::ChatError;
use super::message::{is_valid_channel, normalize_channel, ChatMessage};
use super::transport::ChatTransport;
use crate::queue::{QueueConfig, QueueError, QueueStatus, RequestError, RequestQueue};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

const INBOUND_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub connection: ConnectionConfig,
    pub buffer: BufferConfig,
    pub send_rate: RateLimitConfig,
    pub send_queue: QueueConfig,
    pub max_message_length: usize,
    /// False when logged in anonymously; sends are refused up front.
    pub can_send: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            buffer: BufferConfig::default(),
            send_rate: RateLimitConfig::chat_default(),
            send_queue: QueueConfig::default(),
            max_message_length: 500,
            can_send: true,
        }
    }
}

pub struct ChatGateway {
    connection: Arc<ChatConnection>,
    buffer: Arc<MessageBuffer>,
    send_queue: RequestQueue<()>,
    writer: Mutex<Option<JoinHandle<()>>>,
    max_message_length: usize,
    can_send: bool,
}

impl ChatGateway {
    /// Must be called from within a tokio runtime; the buffer writer task
    /// starts immediately.
    pub fn new(transport: Arc<dyn ChatTransport>, config: GatewayConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let connection = ChatConnection::new(transport, config.connection, inbound_tx);
        let buffer = Arc::new(MessageBuffer::new(config.buffer));
        let writer = buffer.spawn_writer(inbound_rx);
        let limiter = Arc::new(RateLimiter::new("chat", config.send_rate));

        Self {
            connection,
            buffer,
            send_queue: RequestQueue::new("chat-send", limiter, config.send_queue),
            writer: Mutex::new(Some(writer)),
            max_message_length: config.max_message_length,
            can_send: config.can_send,
        }
    }

    pub async fn start(&self) -> Result<(), ChatError> {
        self.connection.connect().await
    }

    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
        if let Some(writer) = self.writer.lock().await.take() {
            writer.abort();
        }
        info!("Chat gateway stopped");
    }

    /// Join if needed, then collect everything said in the channel over the
    /// next `duration`.
    pub async fn observe_chat(
        &self,
        channel: &str,
        duration: Duration,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let channel = validate_channel(channel)?;
        self.connection.join(&channel).await?;

        let since = Utc::now();
        debug!("Observing #{} for {:?}", channel, duration);
        Ok(self.buffer.observe(&channel, since, duration).await)
    }

    /// Queue a message and wait until it has been written or has failed for good.
    pub async fn send_message(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        if !self.can_send {
            return Err(ChatError::ReadOnly);
        }
        let channel = validate_channel(channel)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("message text is empty".to_string()));
        }
        let length = text.chars().count();
        if length > self.max_message_length {
            return Err(ChatError::InvalidInput(format!(
                "message is {} characters; the limit is {}",
                length, self.max_message_length
            )));
        }

        self.connection.join(&channel).await?;

        let connection = Arc::clone(&self.connection);
        let target = channel.clone();
        let text = text.to_string();
        let outcome = self
            .send_queue
            .enqueue(&format!("send #{}", channel), move || {
                let connection = Arc::clone(&connection);
                let target = target.clone();
                let text = text.clone();
                async move { connection.say(&target, &text).await }
            })
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(QueueError::Rejected(RequestError::Rejected(reason))) => {
                Err(ChatError::Restricted { channel, reason })
            }
            Err(source) => Err(ChatError::SendFailed { channel, source }),
        }
    }

    /// Part a channel and discard its buffered history.
    pub async fn leave_channel(&self, channel: &str) -> Result<bool, ChatError> {
        let channel = validate_channel(channel)?;
        let was_joined = self.connection.part(&channel).await;
        self.buffer.remove_channel(&channel).await;
        Ok(was_joined)
    }

    pub async fn recent_messages(&self, channel: &str, limit: usize) -> Vec<ChatMessage> {
        self.buffer.recent(channel, limit).await
    }

    pub async fn get_connection_health(&self) -> ConnectionHealth {
        self.connection.health().await
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.send_queue.status()
    }
}

fn validate_channel(channel: &str) -> Result<String, ChatError> {
    let channel = normalize_channel(channel);
    if is_valid_channel(&channel) {
        Ok(channel)
    } else {
        Err(ChatError::InvalidInput(format!(
            "invalid channel name: {:?}",
            channel
        )))
    }
}
