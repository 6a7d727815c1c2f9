//! Helix REST access under its own rate budget.

mod client;
mod error;
pub mod transport;
pub mod types;

pub use client::{ApiClient, ApiClientConfig};
pub use error::ApiError;
pub use transport::{
    ApiResponse, ApiTransport, CredentialProvider, Credentials, HelixTransport, StaticCredentials,
};
pub use types::{ChannelInfo, Follower, FollowerList, StreamInfo, Subscriber, SubscriberInfo};
