//! chatgate - rate-limited chat connection and REST access layer.
//!
//! Two independent facades share the same primitives: [`chat::ChatGateway`]
//! keeps a resilient chat session and buffers what is said, and
//! [`api::ApiClient`] batches and paces REST lookups. Each owns its own
//! [`queue::RequestQueue`] and [`rate_limit::RateLimiter`] budget.

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod services;

pub use error::ErrorCode;
pub use services::{Readiness, Services};
