//! Chat connection lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (drop) -> Reconnecting -> Connected
//!                                                                   \-> PermanentlyFailed
//! ```
//!
//! The connection owns the channel subscriptions and the health record; both
//! are only mutated by its own handlers. Inbound messages for subscribed
//! channels are forwarded over an mpsc channel to a single buffer writer.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::error::ChatError;
use super::message::{is_valid_channel, normalize_channel, ChatMessage};
use super::transport::{ChatTransport, TransportEvent};
use crate::queue::RequestError;
use crate::rate_limit::BackoffPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    PermanentlyFailed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::PermanentlyFailed => "permanently failed",
        };
        f.write_str(s)
    }
}

/// Read-only health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub is_connected: bool,
    pub state: ConnectionState,
    pub last_ping_time: Option<DateTime<Utc>>,
    pub last_pong_time: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub last_reconnect_time: Option<DateTime<Utc>>,
    pub connection_uptime_ms: u64,
    pub joined_channels: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub reconnect: BackoffPolicy,
    pub join_retry: BackoffPolicy,
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: BackoffPolicy::reconnect(),
            join_retry: BackoffPolicy::operation(),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

struct ConnectionInner {
    state: ConnectionState,
    last_ping: Option<DateTime<Utc>>,
    last_pong: Option<DateTime<Utc>>,
    reconnect_attempts: u32,
    last_reconnect: Option<DateTime<Utc>>,
    connected_since: Option<Instant>,
    subscriptions: BTreeSet<String>,
    /// Bumped on every successful connect so stale session tasks can tell
    /// they have been superseded.
    session: u64,
    /// Owner token of the single reconnect loop; any other value means the
    /// loop holding it is stale and must stop.
    reconnect_cycle: u64,
    manual_disconnect: bool,
}

pub struct ChatConnection {
    transport: Arc<dyn ChatTransport>,
    config: ConnectionConfig,
    inner: RwLock<ConnectionInner>,
    inbound: mpsc::Sender<ChatMessage>,
}

impl ChatConnection {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        config: ConnectionConfig,
        inbound: mpsc::Sender<ChatMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            inner: RwLock::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                last_ping: None,
                last_pong: None,
                reconnect_attempts: 0,
                last_reconnect: None,
                connected_since: None,
                subscriptions: BTreeSet::new(),
                session: 0,
                reconnect_cycle: 0,
                manual_disconnect: false,
            }),
            inbound,
        })
    }

    /// Open the session. On failure the first reconnection attempt is
    /// scheduled and the error is still reported.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ChatError> {
        {
            let mut inner = self.inner.write().await;
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Reconnecting => {
                    return Err(ChatError::Unavailable(
                        "reconnection already in progress".to_string(),
                    ))
                }
                ConnectionState::Disconnected | ConnectionState::PermanentlyFailed => {}
            }
            inner.state = ConnectionState::Connecting;
            inner.manual_disconnect = false;
        }

        match self.transport.connect().await {
            Ok(events) => {
                self.on_connected(events).await;
                Ok(())
            }
            Err(e) => {
                warn!("Chat connect failed: {}", e);
                self.inner.write().await.state = ConnectionState::Disconnected;
                self.start_reconnect(e.to_string()).await;
                Err(ChatError::Unavailable(e.to_string()))
            }
        }
    }

    /// Close the session deliberately; no reconnection follows.
    pub async fn disconnect(&self) {
        {
            let mut inner = self.inner.write().await;
            inner.manual_disconnect = true;
            inner.reconnect_cycle += 1;
            inner.state = ConnectionState::Disconnected;
            inner.connected_since = None;
        }
        self.transport.disconnect().await;
        info!("Chat disconnected");
    }

    /// Join a channel unless already subscribed.
    pub async fn join(&self, channel: &str) -> Result<(), ChatError> {
        let channel = normalize_channel(channel);
        if !is_valid_channel(&channel) {
            return Err(ChatError::InvalidInput(format!(
                "invalid channel name: {:?}",
                channel
            )));
        }

        {
            let inner = self.inner.read().await;
            if inner.subscriptions.contains(&channel) {
                return Ok(());
            }
            match inner.state {
                ConnectionState::Connected => {}
                ConnectionState::PermanentlyFailed => {
                    return Err(ChatError::Unavailable(
                        "reconnection attempts exhausted".to_string(),
                    ))
                }
                state => {
                    return Err(ChatError::JoinFailed {
                        channel,
                        reason: format!("chat connection is {}", state),
                    })
                }
            }
        }

        let policy = self.config.join_retry;
        let mut attempt = 0;
        loop {
            match self.transport.join(&channel).await {
                Ok(()) => {
                    self.inner
                        .write()
                        .await
                        .subscriptions
                        .insert(channel.clone());
                    info!("Joined #{}", channel);
                    return Ok(());
                }
                Err(e) if e.is_transient() && !policy.is_exhausted(attempt) => {
                    let delay = policy.delay(attempt);
                    attempt += 1;
                    debug!("Join #{} failed ({}), retrying in {:?}", channel, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ChatError::JoinFailed {
                        channel,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Leave a channel. Returns whether it had been joined.
    pub async fn part(&self, channel: &str) -> bool {
        let channel = normalize_channel(channel);
        let (was_joined, connected) = {
            let mut inner = self.inner.write().await;
            (
                inner.subscriptions.remove(&channel),
                inner.state == ConnectionState::Connected,
            )
        };
        if was_joined && connected {
            if let Err(e) = self.transport.part(&channel).await {
                warn!("Failed to part #{}: {}", channel, e);
            }
        }
        was_joined
    }

    /// Send one chat line. Used as the queued send operation.
    pub async fn say(&self, channel: &str, text: &str) -> Result<(), RequestError> {
        if self.inner.read().await.state != ConnectionState::Connected {
            return Err(RequestError::NotConnected);
        }
        self.transport.say(channel, text).await?;
        Ok(())
    }

    pub async fn is_joined(&self, channel: &str) -> bool {
        self.inner
            .read()
            .await
            .subscriptions
            .contains(&normalize_channel(channel))
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    pub async fn health(&self) -> ConnectionHealth {
        let inner = self.inner.read().await;
        ConnectionHealth {
            is_connected: inner.state == ConnectionState::Connected,
            state: inner.state,
            last_ping_time: inner.last_ping,
            last_pong_time: inner.last_pong,
            reconnect_attempts: inner.reconnect_attempts,
            last_reconnect_time: inner.last_reconnect,
            connection_uptime_ms: inner
                .connected_since
                .map(|since| since.elapsed().as_millis() as u64)
                .unwrap_or(0),
            joined_channels: inner.subscriptions.iter().cloned().collect(),
        }
    }

    async fn on_connected(self: &Arc<Self>, events: mpsc::Receiver<TransportEvent>) {
        let (session, channels) = {
            let mut inner = self.inner.write().await;
            if inner.manual_disconnect {
                drop(inner);
                self.transport.disconnect().await;
                return;
            }
            inner.state = ConnectionState::Connected;
            inner.reconnect_attempts = 0;
            inner.reconnect_cycle += 1;
            inner.connected_since = Some(Instant::now());
            inner.session += 1;
            (
                inner.session,
                inner.subscriptions.iter().cloned().collect::<Vec<_>>(),
            )
        };
        info!("Chat connected (session {})", session);

        for channel in channels {
            if let Err(e) = self.transport.join(&channel).await {
                warn!("Failed to rejoin #{}: {}", channel, e);
                // Forget it so the next join() sends a fresh JOIN.
                self.inner.write().await.subscriptions.remove(&channel);
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_session(session, events).await });
    }

    async fn run_session(self: Arc<Self>, session: u64, mut events: mpsc::Receiver<TransportEvent>) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        heartbeat.tick().await;

        let reason = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Message(message)) => self.dispatch(message).await,
                    Some(TransportEvent::Pong) => {
                        self.inner.write().await.last_pong = Some(Utc::now());
                    }
                    Some(TransportEvent::Notice { channel, msg_id, text }) => {
                        warn!(
                            "Chat notice for {}: {} ({})",
                            channel.as_deref().unwrap_or("server"),
                            text,
                            msg_id.as_deref().unwrap_or("-")
                        );
                    }
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::Disconnected { reason }) => break reason,
                    None => break "event stream closed".to_string(),
                },
                _ = heartbeat.tick() => {
                    match self.transport.ping().await {
                        Ok(()) => self.inner.write().await.last_ping = Some(Utc::now()),
                        Err(e) => debug!("Heartbeat ping failed: {}", e),
                    }
                }
            }
        };

        self.on_disconnected(session, reason).await;
    }

    async fn dispatch(&self, message: ChatMessage) {
        if !self.inner.read().await.subscriptions.contains(&message.channel) {
            return;
        }
        if self.inbound.send(message).await.is_err() {
            debug!("Message buffer writer is gone; dropping inbound message");
        }
    }

    async fn on_disconnected(self: &Arc<Self>, session: u64, reason: String) {
        let unexpected = {
            let mut inner = self.inner.write().await;
            if inner.session != session
                || inner.manual_disconnect
                || inner.state != ConnectionState::Connected
            {
                false
            } else {
                inner.state = ConnectionState::Disconnected;
                inner.connected_since = None;
                true
            }
        };
        if unexpected {
            warn!("Chat connection lost: {}", reason);
            self.start_reconnect(reason).await;
        }
    }

    async fn start_reconnect(self: &Arc<Self>, reason: String) {
        let cycle = {
            let mut inner = self.inner.write().await;
            if inner.manual_disconnect || inner.state == ConnectionState::Reconnecting {
                return;
            }
            inner.state = ConnectionState::Reconnecting;
            inner.reconnect_attempts = 0;
            inner.reconnect_cycle += 1;
            inner.reconnect_cycle
        };
        tokio::spawn(Arc::clone(self).reconnect_loop(cycle, reason));
    }

    /// Boxed so the connect -> session -> reconnect cycle has a `Send` type.
    fn reconnect_loop(self: Arc<Self>, cycle: u64, reason: String) -> BoxFuture<'static, ()> {
        async move {
            let policy = self.config.reconnect;
            let mut attempt = 0u32;
            info!("Scheduling chat reconnection after: {}", reason);

            loop {
                if policy.is_exhausted(attempt) {
                    let mut inner = self.inner.write().await;
                    if inner.reconnect_cycle == cycle {
                        inner.state = ConnectionState::PermanentlyFailed;
                        error!("Chat reconnection gave up after {} attempts", attempt);
                    }
                    return;
                }

                let delay = policy.delay(attempt);
                debug!("Chat reconnect attempt {} in {:?}", attempt + 1, delay);
                tokio::time::sleep(delay).await;

                {
                    let mut inner = self.inner.write().await;
                    if inner.manual_disconnect || inner.reconnect_cycle != cycle {
                        debug!("Reconnect cycle {} superseded", cycle);
                        return;
                    }
                    inner.last_reconnect = Some(Utc::now());
                }

                match self.transport.connect().await {
                    Ok(events) => {
                        {
                            let inner = self.inner.read().await;
                            if inner.manual_disconnect || inner.reconnect_cycle != cycle {
                                debug!("Reconnect cycle {} superseded after connect", cycle);
                                return;
                            }
                        }
                        info!("Chat reconnected after {} failed attempts", attempt);
                        self.on_connected(events).await;
                        return;
                    }
                    Err(e) => {
                        attempt += 1;
                        let mut inner = self.inner.write().await;
                        if inner.reconnect_cycle != cycle {
                            return;
                        }
                        inner.reconnect_attempts = attempt;
                        warn!("Chat reconnect attempt {} failed: {}", attempt, e);
                    }
                }
            }
        }
        .boxed()
    }
}
