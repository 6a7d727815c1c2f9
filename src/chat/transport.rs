//! Chat protocol transport.
//!
//! [`ChatTransport`] is the seam between the connection state machine and the
//! wire. Each successful `connect` yields a fresh event stream for that
//! session; the stream ends (or emits `Disconnected`) when the session dies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::irc::{self, IrcMessage};
use super::message::ChatMessage;
use crate::queue::RequestError;

/// Events emitted by a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message(ChatMessage),
    Pong,
    Notice {
        channel: Option<String>,
        msg_id: Option<String>,
        text: String,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Timeout(_) | TransportError::NotConnected
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl From<TransportError> for RequestError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Io(msg) => RequestError::Network(msg),
            TransportError::Timeout(after) => RequestError::Network(format!("timed out after {:?}", after)),
            TransportError::Auth(msg) => RequestError::Unauthorized(msg),
            TransportError::NotConnected => RequestError::NotConnected,
            TransportError::Rejected(msg) => RequestError::Rejected(msg),
        }
    }
}

/// Wire-level chat operations.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a session and complete the login handshake.
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Close the current session, if any.
    async fn disconnect(&self);

    async fn join(&self, channel: &str) -> Result<(), TransportError>;

    async fn part(&self, channel: &str) -> Result<(), TransportError>;

    async fn say(&self, channel: &str, text: &str) -> Result<(), TransportError>;

    /// Protocol-level liveness probe; the reply arrives as `TransportEvent::Pong`.
    async fn ping(&self) -> Result<(), TransportError>;
}

/// Login and endpoint settings for [`IrcTransport`].
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub host: String,
    pub port: u16,
    /// None logs in anonymously (read-only).
    pub nickname: Option<String>,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub max_message_length: usize,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            host: "irc.chat.twitch.tv".to_string(),
            port: 6667,
            nickname: None,
            token: None,
            connect_timeout: Duration::from_secs(15),
            max_message_length: 500,
        }
    }
}

struct IrcSession {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
}

/// Plain TCP IRC transport.
pub struct IrcTransport {
    config: IrcConfig,
    session: Mutex<Option<IrcSession>>,
}

const EVENT_BUFFER: usize = 1024;
const PING_TOKEN: &str = "chatgate";

impl IrcTransport {
    pub fn new(config: IrcConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    fn login_nick(&self) -> String {
        match &self.config.nickname {
            Some(nick) => nick.to_lowercase(),
            None => format!("justinfan{}", 10_000 + Utc::now().timestamp_subsec_micros() % 80_000),
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let writer = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(s) => Arc::clone(&s.writer),
                None => return Err(TransportError::NotConnected),
            }
        };
        let mut writer = writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read until the welcome numeric, answering PINGs and failing on auth NOTICEs.
    async fn await_welcome(
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), TransportError> {
        loop {
            let Some(line) = lines.next_line().await? else {
                return Err(TransportError::Io("connection closed during login".to_string()));
            };
            let Some(msg) = IrcMessage::parse(&line) else {
                continue;
            };
            match msg.command.as_str() {
                "001" => return Ok(()),
                "PING" => {
                    let token = msg.trailing().unwrap_or_default().to_string();
                    writer.write_all(irc::format_pong(&token).as_bytes()).await?;
                    writer.flush().await?;
                }
                "NOTICE" => {
                    let text = msg.trailing().unwrap_or_default();
                    if irc::is_login_failure(text) {
                        return Err(TransportError::Auth(text.to_string()));
                    }
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl ChatTransport for IrcTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.disconnect().await;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let timeout = self.config.connect_timeout;
        let nick = self.login_nick();
        info!("Connecting to chat at {} as {}", addr, nick);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(b"CAP REQ :twitch.tv/tags twitch.tv/commands\r\n")
            .await?;
        if let Some(token) = &self.config.token {
            let token = token.trim_start_matches("oauth:");
            write_half
                .write_all(format!("PASS oauth:{}\r\n", token).as_bytes())
                .await?;
        }
        write_half
            .write_all(format!("NICK {}\r\n", nick).as_bytes())
            .await?;
        write_half.flush().await?;

        tokio::time::timeout(timeout, Self::await_welcome(&mut lines, &mut write_half))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        debug!("Chat login accepted for {}", nick);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        // Fresh channel with spare capacity; this send cannot fail or block.
        let _ = tx.send(TransportEvent::Connected).await;

        let writer = Arc::new(Mutex::new(write_half));
        let reader = tokio::spawn(read_loop(lines, Arc::clone(&writer), tx));

        *self.session.lock().await = Some(IrcSession { writer, reader });
        Ok(rx)
    }

    async fn disconnect(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        {
            let mut writer = session.writer.lock().await;
            let _ = writer.write_all(b"QUIT\r\n").await;
            let _ = writer.shutdown().await;
        }
        session.reader.abort();
        debug!("Chat session closed");
    }

    async fn join(&self, channel: &str) -> Result<(), TransportError> {
        self.write_line(&irc::format_join(channel)).await
    }

    async fn part(&self, channel: &str) -> Result<(), TransportError> {
        self.write_line(&irc::format_part(channel)).await
    }

    async fn say(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        if text.chars().count() > self.config.max_message_length {
            return Err(TransportError::Rejected(format!(
                "message exceeds {} characters",
                self.config.max_message_length
            )));
        }
        self.write_line(&irc::format_privmsg(channel, text)).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.write_line(&irc::format_ping(PING_TOKEN)).await
    }
}

async fn read_loop(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    tx: mpsc::Sender<TransportEvent>,
) {
    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "connection closed by server".to_string(),
            Err(e) => break format!("read failed: {}", e),
        };
        let Some(msg) = IrcMessage::parse(&line) else {
            continue;
        };

        let event = match msg.command.as_str() {
            "PING" => {
                let token = msg.trailing().unwrap_or_default();
                let mut writer = writer.lock().await;
                if let Err(e) = writer.write_all(irc::format_pong(token).as_bytes()).await {
                    break format!("failed to answer PING: {}", e);
                }
                let _ = writer.flush().await;
                continue;
            }
            "PONG" => TransportEvent::Pong,
            "PRIVMSG" => match msg.to_chat_message(Utc::now()) {
                Some(message) => TransportEvent::Message(message),
                None => continue,
            },
            "NOTICE" => TransportEvent::Notice {
                channel: msg.channel(),
                msg_id: msg.tag("msg-id").map(str::to_string),
                text: msg.trailing().unwrap_or_default().to_string(),
            },
            "RECONNECT" => break "server requested reconnect".to_string(),
            _ => continue,
        };

        if tx.send(event).await.is_err() {
            debug!("Chat event receiver dropped, stopping reader");
            return;
        }
    };

    warn!("Chat session ended: {}", reason);
    let _ = tx.send(TransportEvent::Disconnected { reason }).await;
}
