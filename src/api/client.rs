//! Rate-limited Helix client.
//!
//! Every call goes through one [`RequestQueue`] under the REST budget. A 429
//! pushes the server's cooldown into the shared [`RateLimiter`] so that the
//! retry, and everything queued behind it, waits for the server rather than
//! for the local window alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::ApiError;
use super::transport::ApiTransport;
use super::types::{
    ChannelInfo, Follower, FollowerList, HelixChannel, HelixFollower, HelixPage, HelixStream,
    HelixSubscription, HelixUser, StreamInfo, Subscriber, SubscriberInfo,
};
use crate::chat::message::{is_valid_channel, normalize_channel};
use crate::queue::{QueueConfig, QueueStatus, RequestError, RequestQueue};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// Cooldown applied when a 429 carries no usable reset header.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Helix page size ceiling for collection endpoints.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ApiClientConfig {
    pub rate: RateLimitConfig,
    pub queue: QueueConfig,
    /// Logins per batched lookup request.
    pub batch_size: usize,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            rate: RateLimitConfig::api_default(),
            queue: QueueConfig {
                pacing: Duration::from_millis(20),
                ..QueueConfig::default()
            },
            batch_size: MAX_PAGE_SIZE,
        }
    }
}

pub struct ApiClient {
    transport: Arc<dyn ApiTransport>,
    queue: RequestQueue<Value>,
    batch_size: usize,
    /// login -> user, filled by lookups and never invalidated.
    users: RwLock<HashMap<String, HelixUser>>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn ApiTransport>, config: ApiClientConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new("helix", config.rate));
        Self {
            transport,
            queue: RequestQueue::new("helix", limiter, config.queue),
            batch_size: config.batch_size.clamp(1, MAX_PAGE_SIZE),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Current stream for a channel, or None when it is offline.
    pub async fn get_stream_info(&self, channel: &str) -> Result<Option<StreamInfo>, ApiError> {
        let channel = validate_channel(channel)?;
        let query = vec![
            ("user_login".to_string(), channel.clone()),
            ("first".to_string(), "1".to_string()),
        ];
        let page: HelixPage<HelixStream> =
            decode(self.execute(&format!("stream {}", channel), "streams", query).await?)?;
        Ok(page.data.into_iter().next().map(StreamInfo::from))
    }

    /// Like [`ApiClient::get_stream_info`] but treats an offline channel as an error.
    pub async fn get_live_stream(&self, channel: &str) -> Result<StreamInfo, ApiError> {
        match self.get_stream_info(channel).await? {
            Some(stream) if stream.is_live => Ok(stream),
            _ => Err(ApiError::ChannelOffline(normalize_channel(channel))),
        }
    }

    pub async fn get_channel_info(&self, channel: &str) -> Result<ChannelInfo, ApiError> {
        let user = self.get_user(channel).await?;
        let query = vec![("broadcaster_id".to_string(), user.id.clone())];
        let page: HelixPage<HelixChannel> = decode(
            self.execute(&format!("channel {}", user.login), "channels", query)
                .await?,
        )?;
        Ok(ChannelInfo::from_parts(user, page.data.into_iter().next()))
    }

    /// Stream status for many channels in as few requests as the batch size
    /// allows. The result has one entry per input channel, in input order.
    pub async fn get_multiple_streams_info(
        &self,
        channels: &[String],
    ) -> Result<Vec<StreamInfo>, ApiError> {
        let channels = channels
            .iter()
            .map(|c| validate_channel(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let unique: Vec<&String> = channels.iter().filter(|c| seen.insert(*c)).collect();

        let requests = unique.chunks(self.batch_size).enumerate().map(|(i, chunk)| {
            let mut query: Vec<(String, String)> = chunk
                .iter()
                .map(|c| ("user_login".to_string(), (*c).clone()))
                .collect();
            query.push(("first".to_string(), MAX_PAGE_SIZE.to_string()));
            async move {
                let page: HelixPage<HelixStream> =
                    decode(self.execute(&format!("streams batch {}", i), "streams", query).await?)?;
                Ok::<_, ApiError>(page.data)
            }
        });

        let mut live: HashMap<String, StreamInfo> = HashMap::new();
        for stream in try_join_all(requests).await?.into_iter().flatten() {
            let info = StreamInfo::from(stream);
            live.insert(info.channel.clone(), info);
        }
        debug!("{} of {} channels live", live.len(), unique.len());

        Ok(channels
            .iter()
            .map(|c| {
                live.get(c)
                    .cloned()
                    .unwrap_or_else(|| StreamInfo::offline(c))
            })
            .collect())
    }

    /// Newest followers first, following pagination until `count` are collected.
    pub async fn get_recent_followers(
        &self,
        channel: &str,
        count: usize,
    ) -> Result<FollowerList, ApiError> {
        if count == 0 {
            return Err(ApiError::InvalidInput("count must be at least 1".to_string()));
        }
        let user = self.get_user(channel).await?;

        let mut followers: Vec<Follower> = Vec::with_capacity(count.min(1000));
        let mut total = 0;
        let mut cursor: Option<String> = None;
        loop {
            let remaining = count - followers.len();
            let mut query = vec![
                ("broadcaster_id".to_string(), user.id.clone()),
                ("first".to_string(), remaining.min(MAX_PAGE_SIZE).to_string()),
            ];
            if let Some(after) = cursor.take() {
                query.push(("after".to_string(), after));
            }

            let page: HelixPage<HelixFollower> = decode(
                self.execute(&format!("followers {}", user.login), "channels/followers", query)
                    .await?,
            )?;
            total = page.total.unwrap_or(total);
            cursor = page.cursor().map(str::to_string);
            let fetched = page.data.len();
            followers.extend(page.data.into_iter().map(Follower::from));

            if fetched == 0 || followers.len() >= count || cursor.is_none() {
                break;
            }
        }
        followers.truncate(count);

        Ok(FollowerList {
            channel: user.login,
            total,
            followers,
        })
    }

    /// Subscriber count, points and the first page of subscribers.
    /// Requires the `channel:read:subscriptions` scope for that broadcaster.
    pub async fn get_subscriber_info(&self, channel: &str) -> Result<SubscriberInfo, ApiError> {
        let user = self.get_user(channel).await?;
        let query = vec![
            ("broadcaster_id".to_string(), user.id.clone()),
            ("first".to_string(), MAX_PAGE_SIZE.to_string()),
        ];
        let page: HelixPage<HelixSubscription> = decode(
            self.execute(&format!("subscriptions {}", user.login), "subscriptions", query)
                .await?,
        )?;

        let subscribers: Vec<Subscriber> = page.data.into_iter().map(Subscriber::from).collect();
        Ok(SubscriberInfo {
            channel: user.login,
            total: page.total.unwrap_or(subscribers.len() as u64),
            points: page.points.unwrap_or(0),
            subscribers,
        })
    }

    async fn get_user(&self, channel: &str) -> Result<HelixUser, ApiError> {
        let channel = validate_channel(channel)?;
        let mut users = self.lookup_users(std::slice::from_ref(&channel)).await?;
        users
            .remove(&channel)
            .ok_or(ApiError::ChannelNotFound(channel))
    }

    /// Resolve logins to users, serving repeats from the cache.
    async fn lookup_users(&self, logins: &[String]) -> Result<HashMap<String, HelixUser>, ApiError> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.users.read().await;
            for login in logins {
                match cache.get(login) {
                    Some(user) => {
                        found.insert(login.clone(), user.clone());
                    }
                    None => missing.push(login.clone()),
                }
            }
        }

        for chunk in missing.chunks(self.batch_size) {
            let query = chunk
                .iter()
                .map(|login| ("login".to_string(), login.clone()))
                .collect();
            let page: HelixPage<HelixUser> =
                decode(self.execute("users", "users", query).await?)?;

            let mut cache = self.users.write().await;
            for user in page.data {
                let login = user.login.to_lowercase();
                cache.insert(login.clone(), user.clone());
                found.insert(login, user);
            }
        }

        Ok(found)
    }

    /// Queue one GET. Non-2xx statuses become classified request errors.
    async fn execute(
        &self,
        label: &str,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<Value, ApiError> {
        let transport = Arc::clone(&self.transport);
        let limiter = Arc::clone(self.queue.limiter());
        let path = path.to_string();

        let body = self
            .queue
            .enqueue(label, move || {
                let transport = Arc::clone(&transport);
                let limiter = Arc::clone(&limiter);
                let path = path.clone();
                let query = query.clone();
                async move {
                    let response = transport.get(&path, &query).await?;
                    if response.is_success() {
                        return Ok(response.body);
                    }
                    if response.status == 429 {
                        let cooldown = response.retry_after.unwrap_or(DEFAULT_COOLDOWN);
                        info!("Helix rate limit hit on {}, cooling down {:?}", path, cooldown);
                        limiter.set_retry_after(cooldown);
                    }
                    Err(RequestError::from_status(
                        response.status,
                        response.error_message(),
                        response.retry_after,
                    ))
                }
            })
            .await?;
        Ok(body)
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<HelixPage<T>, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn validate_channel(channel: &str) -> Result<String, ApiError> {
    let channel = normalize_channel(channel);
    if is_valid_channel(&channel) {
        Ok(channel)
    } else {
        Err(ApiError::InvalidInput(format!(
            "invalid channel name: {:?}",
            channel
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::ApiResponse;
    use crate::error::ErrorCode;
    use crate::rate_limit::BackoffPolicy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Handler = Box<dyn Fn(&str, &[(String, String)]) -> ApiResponse + Send + Sync>;

    struct FakeHelix {
        handler: Handler,
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FakeHelix {
        fn new(
            handler: impl Fn(&str, &[(String, String)]) -> ApiResponse + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ApiTransport for FakeHelix {
        async fn get(
            &self,
            path: &str,
            query: &[(String, String)],
        ) -> Result<ApiResponse, RequestError> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), query.to_vec()));
            Ok((self.handler)(path, query))
        }
    }

    fn ok(body: Value) -> ApiResponse {
        ApiResponse {
            status: 200,
            retry_after: None,
            body,
        }
    }

    fn values<'a>(query: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn stream_json(login: &str) -> Value {
        json!({"user_login": login, "user_name": login, "type": "live", "title": "live now", "viewer_count": 10})
    }

    fn client(fake: Arc<FakeHelix>, max_retries: u32) -> ApiClient {
        ApiClient::new(
            fake,
            ApiClientConfig {
                rate: RateLimitConfig::new(100, Duration::from_secs(60)),
                queue: QueueConfig {
                    retry: BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(5), max_retries),
                    pacing: Duration::ZERO,
                },
                batch_size: 100,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_stream_is_none() {
        let fake = FakeHelix::new(|_, _| ok(json!({"data": [], "pagination": {}})));
        let client = client(fake, 0);

        assert!(client.get_stream_info("quiet").await.unwrap().is_none());
        let err = client.get_live_stream("quiet").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChannelOffline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_streams_preserve_order_and_mark_offline() {
        // Every even-numbered channel is live.
        let fake = FakeHelix::new(|_, query| {
            let live: Vec<Value> = values(query, "user_login")
                .into_iter()
                .filter(|login| {
                    login
                        .trim_start_matches('c')
                        .parse::<usize>()
                        .map(|n| n % 2 == 0)
                        .unwrap_or(false)
                })
                .rev()
                .map(stream_json)
                .collect();
            ok(json!({ "data": live }))
        });
        let client = client(fake.clone(), 0);

        let channels: Vec<String> = (0..250).map(|i| format!("c{}", i)).collect();
        let result = client.get_multiple_streams_info(&channels).await.unwrap();

        assert_eq!(fake.calls().len(), 3);
        let batch_sizes: Vec<usize> = fake
            .calls()
            .iter()
            .map(|(_, q)| values(q, "user_login").len())
            .collect();
        assert_eq!(batch_sizes, vec![100, 100, 50]);

        assert_eq!(result.len(), 250);
        for (i, info) in result.iter().enumerate() {
            assert_eq!(info.channel, format!("c{}", i));
            assert_eq!(info.is_live, i % 2 == 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_channels_are_requested_once() {
        let fake = FakeHelix::new(|_, _| ok(json!({"data": [stream_json("a")]})));
        let client = client(fake.clone(), 0);

        let channels = vec!["A".to_string(), "b".to_string(), "#a".to_string()];
        let result = client.get_multiple_streams_info(&channels).await.unwrap();

        assert_eq!(values(&fake.calls()[0].1, "user_login"), vec!["a", "b"]);
        let live: Vec<bool> = result.iter().map(|s| s.is_live).collect();
        assert_eq!(live, vec![true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_sets_limiter_cooldown() {
        let fake = FakeHelix::new(|_, _| ApiResponse {
            status: 429,
            retry_after: Some(Duration::from_secs(10)),
            body: json!({"message": "Too Many Requests"}),
        });
        let client = client(fake, 0);

        let err = client.get_stream_info("streamer").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimited);

        let acquire = client.queue.limiter().try_acquire();
        assert!(!acquire.allowed);
        assert!(acquire.retry_after > Duration::from_secs(9));
        assert!(client.queue_status().rate.cooldown_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_retry_waits_for_server_cooldown() {
        let hits = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&hits);
        let fake = FakeHelix::new(move |_, _| {
            let mut hits = counter.lock().unwrap();
            *hits += 1;
            if *hits == 1 {
                ApiResponse {
                    status: 429,
                    retry_after: Some(Duration::from_secs(10)),
                    body: Value::Null,
                }
            } else {
                ok(json!({"data": [stream_json("streamer")]}))
            }
        });
        let client = client(fake, 3);
        let start = Instant::now();

        let info = client.get_stream_info("streamer").await.unwrap().unwrap();
        assert!(info.is_live);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_a_decode_error() {
        let fake = FakeHelix::new(|_, _| ok(json!({"data": "not a list"})));
        let client = client(fake.clone(), 3);

        let err = client.get_stream_info("streamer").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(err.code(), ErrorCode::ServerError);
        // Decoding happens after the queued request; it is not retried.
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_channel_is_not_found() {
        let fake = FakeHelix::new(|_, _| ok(json!({"data": []})));
        let client = client(fake, 0);

        let err = client.get_channel_info("nobody").await.unwrap_err();
        assert!(matches!(err, ApiError::ChannelNotFound(_)));
        assert_eq!(err.code(), ErrorCode::ChannelNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_info_uses_user_cache() {
        let fake = FakeHelix::new(|path, _| match path {
            "users" => ok(json!({"data": [{"id": "42", "login": "streamer", "display_name": "Streamer"}]})),
            "channels" => ok(json!({"data": [{"broadcaster_id": "42", "title": "Hello", "game_name": "Chess", "broadcaster_language": "en", "tags": []}]})),
            _ => ok(json!({"data": []})),
        });
        let client = client(fake.clone(), 0);

        let info = client.get_channel_info("Streamer").await.unwrap();
        assert_eq!(info.id, "42");
        assert_eq!(info.title.as_deref(), Some("Hello"));

        client.get_channel_info("streamer").await.unwrap();
        let user_lookups = fake.calls().iter().filter(|(p, _)| p == "users").count();
        assert_eq!(user_lookups, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_followers_follow_cursor() {
        let fake = FakeHelix::new(|path, query| match path {
            "users" => ok(json!({"data": [{"id": "42", "login": "streamer"}]})),
            _ => {
                let first: usize = values(query, "first")[0].parse().unwrap();
                let page = values(query, "after").first().map(|c| c.to_string());
                let offset = if page.as_deref() == Some("p2") { 100 } else { 0 };
                let data: Vec<Value> = (offset..offset + first)
                    .map(|i| json!({"user_id": i.to_string(), "user_login": format!("fan{}", i), "user_name": "", "followed_at": "2024-01-01T00:00:00Z"}))
                    .collect();
                ok(json!({"total": 5000, "data": data, "pagination": {"cursor": "p2"}}))
            }
        });
        let client = client(fake.clone(), 0);

        let list = client.get_recent_followers("streamer", 150).await.unwrap();
        assert_eq!(list.total, 5000);
        assert_eq!(list.followers.len(), 150);
        assert_eq!(list.followers[149].login, "fan149");

        let follower_calls: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|(p, _)| p == "channels/followers")
            .collect();
        assert_eq!(follower_calls.len(), 2);
        assert_eq!(values(&follower_calls[1].1, "first"), vec!["50"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_scope_on_subscriptions() {
        let fake = FakeHelix::new(|path, _| match path {
            "users" => ok(json!({"data": [{"id": "42", "login": "streamer"}]})),
            _ => ApiResponse {
                status: 403,
                retry_after: None,
                body: json!({"message": "Missing scope: channel:read:subscriptions"}),
            },
        });
        let client = client(fake, 3);

        let err = client.get_subscriber_info("streamer").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingScope);
    }
}
