//! Chat side: protocol codec, transport, connection lifecycle, message
//! buffering and the [`ChatGateway`] facade.

pub mod buffer;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod irc;
pub mod message;
pub mod transport;

pub use buffer::{BufferConfig, MessageBuffer};
pub use connection::{ChatConnection, ConnectionConfig, ConnectionHealth, ConnectionState};
pub use error::ChatError;
pub use gateway::{ChatGateway, GatewayConfig};
pub use message::{normalize_channel, ChatMessage};
pub use transport::{ChatTransport, IrcConfig, IrcTransport, TransportError, TransportEvent};
