//! End-to-end flows through the public facades over in-memory transports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use chatgate::api::{ApiClient, ApiClientConfig, ApiResponse, ApiTransport};
use chatgate::chat::{
    ChatGateway, ChatMessage, ChatTransport, GatewayConfig, TransportError, TransportEvent,
};
use chatgate::queue::{QueueConfig, RequestError};
use chatgate::rate_limit::{BackoffPolicy, RateLimitConfig};
use chatgate::ErrorCode;

#[derive(Default)]
struct ScriptedChat {
    connects: Mutex<u32>,
    failing_connects: Mutex<Vec<u32>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    said: Mutex<Vec<(String, String)>>,
}

impl ScriptedChat {
    async fn push(&self, event: TransportEvent) {
        let tx = self.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            tx.send(event).await.unwrap();
        }
    }

    async fn kill_session(&self) {
        let tx = self.events.lock().unwrap().take();
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportEvent::Disconnected {
                    reason: "reset by peer".into(),
                })
                .await;
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedChat {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let attempt = {
            let mut connects = self.connects.lock().unwrap();
            *connects += 1;
            *connects
        };
        if self.failing_connects.lock().unwrap().contains(&attempt) {
            return Err(TransportError::Io("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        self.events.lock().unwrap().take();
    }

    async fn join(&self, _channel: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn part(&self, _channel: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn say(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        if self.events.lock().unwrap().is_none() {
            return Err(TransportError::NotConnected);
        }
        self.said
            .lock()
            .unwrap()
            .push((channel.to_string(), text.to_string()));
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn chat_line(channel: &str, text: &str) -> TransportEvent {
    TransportEvent::Message(ChatMessage {
        channel: channel.to_string(),
        username: "viewer".into(),
        display_name: "Viewer".into(),
        text: text.to_string(),
        timestamp: Utc::now(),
        is_action: false,
    })
}

#[tokio::test(start_paused = true)]
async fn chat_survives_a_dropped_session() {
    let transport = Arc::new(ScriptedChat::default());
    // Session 1 succeeds, reconnect attempts 2-4 fail, attempt 5 succeeds.
    *transport.failing_connects.lock().unwrap() = vec![2, 3, 4];

    let gateway = Arc::new(ChatGateway::new(transport.clone(), GatewayConfig::default()));
    gateway.start().await.unwrap();
    gateway
        .observe_chat("streamer", Duration::from_secs(1))
        .await
        .unwrap();

    transport.kill_session().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let health = gateway.get_connection_health().await;
    assert!(!health.is_connected);
    assert_eq!(health.reconnect_attempts, 3);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let health = gateway.get_connection_health().await;
    assert!(health.is_connected);
    assert_eq!(health.reconnect_attempts, 0);
    assert_eq!(health.joined_channels, vec!["streamer".to_string()]);

    let observer = Arc::clone(&gateway);
    let observation = tokio::spawn(async move {
        observer
            .observe_chat("streamer", Duration::from_secs(3))
            .await
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    transport.push(chat_line("streamer", "welcome back")).await;

    let messages = observation.await.unwrap().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "welcome back");

    gateway.send_message("streamer", "thanks").await.unwrap();
    assert_eq!(
        *transport.said.lock().unwrap(),
        vec![("streamer".to_string(), "thanks".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn sends_wait_out_a_dropped_session() {
    let transport = Arc::new(ScriptedChat::default());
    let gateway = Arc::new(ChatGateway::new(
        transport.clone(),
        GatewayConfig {
            send_queue: QueueConfig {
                retry: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(4), 5),
                pacing: Duration::ZERO,
            },
            ..GatewayConfig::default()
        },
    ));
    gateway.start().await.unwrap();
    gateway
        .observe_chat("streamer", Duration::ZERO)
        .await
        .unwrap();

    transport.kill_session().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The reconnect lands after 1s; the queued send retries until then.
    gateway.send_message("streamer", "still here").await.unwrap();
    assert_eq!(transport.said.lock().unwrap().len(), 1);
    assert!(gateway.get_queue_status().retried >= 1);
}

struct CountingHelix {
    requests: Mutex<Vec<Instant>>,
    throttle_first: bool,
}

#[async_trait]
impl ApiTransport for CountingHelix {
    async fn get(
        &self,
        _path: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse, RequestError> {
        let first = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(Instant::now());
            requests.len() == 1
        };
        if first && self.throttle_first {
            return Ok(ApiResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(10)),
                body: json!({"message": "Too Many Requests"}),
            });
        }
        let live: Vec<_> = query
            .iter()
            .filter(|(k, v)| k == "user_login" && v.ends_with('1'))
            .map(|(_, v)| json!({"user_login": v, "type": "live", "viewer_count": 1}))
            .collect();
        Ok(ApiResponse {
            status: 200,
            retry_after: None,
            body: json!({ "data": live }),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn api_honors_server_cooldown_across_requests() {
    let transport = Arc::new(CountingHelix {
        requests: Mutex::new(Vec::new()),
        throttle_first: true,
    });
    let client = ApiClient::new(
        transport.clone(),
        ApiClientConfig {
            rate: RateLimitConfig::new(800, Duration::from_secs(60)),
            queue: QueueConfig {
                retry: BackoffPolicy::operation(),
                pacing: Duration::ZERO,
            },
            batch_size: 100,
        },
    );
    let start = Instant::now();

    let channels: Vec<String> = (0..150).map(|i| format!("chan{}", i)).collect();
    let streams = client.get_multiple_streams_info(&channels).await.unwrap();

    assert_eq!(streams.len(), 150);
    assert!(streams[1].is_live);
    assert!(!streams[2].is_live);
    assert_eq!(streams[149].channel, "chan149");

    let requests = transport.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 3);
    // Nothing went out during the 10s cooldown after the 429.
    assert!(requests[1].duration_since(start) >= Duration::from_secs(10));
    assert!(requests[2].duration_since(start) >= Duration::from_secs(10));
}

#[tokio::test]
async fn api_rejects_bad_channel_names_before_queueing() {
    let transport = Arc::new(CountingHelix {
        requests: Mutex::new(Vec::new()),
        throttle_first: false,
    });
    let client = ApiClient::new(transport.clone(), ApiClientConfig::default());

    let err = client.get_stream_info("no spaces allowed").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    assert!(transport.requests.lock().unwrap().is_empty());
}
