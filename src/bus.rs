use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::circuit_breaker::CircuitBreaker;

pub const CHANNEL_GLOBAL_BROADCAST: &str = "global:broadcast";
pub const CHANNEL_ROOM_CREATED: &str = "room:created";

pub fn channel_room_messages(room_id: &str) -> String {
    format!("room:{room_id}:messages")
}

pub fn channel_room_events(room_id: &str) -> String {
    format!("room:{room_id}:events")
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Value,
}

const CHANNEL_CAPACITY: usize = 1024;

/// Abstract publish/subscribe over named channels (C6). Optional: a deployment with no
/// `REDIS_URL` configured gets `InProcessBus` and keeps working as a single instance —
/// the rest of the core never branches on whether a shared bus is present.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Value);
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage>;
}

/// A registry of one broadcast channel per bus channel name, keyed by channel string so
/// the set of live channels can grow dynamically (one per room, plus the global ones)
/// instead of being fixed at compile time.
pub struct InProcessBus {
    channels: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessBus {
    pub fn new() -> Self {
        Self { channels: Mutex::new(HashMap::new()) }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<BusMessage> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl Bus for InProcessBus {
    async fn publish(&self, channel: &str, payload: Value) {
        let sender = self.sender_for(channel);
        let _ = sender.send(BusMessage { channel: channel.to_string(), payload });
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(channel).subscribe()
    }
}

/// Cross-instance bus backed by Redis pub/sub, with an in-process fallback so local
/// subscribers on the same instance never depend on the Redis round-trip. Publishes are
/// routed through the circuit breaker (C2); a tripped breaker degrades to
/// local-instance-only fan-out rather than blocking the publish.
pub struct RedisBus {
    local: InProcessBus,
    client: redis::Client,
    breaker: Arc<CircuitBreaker>,
}

impl RedisBus {
    pub fn new(redis_url: &str, breaker: Arc<CircuitBreaker>) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { local: InProcessBus::new(), client, breaker })
    }

    /// Starts a background task that forwards every message on every Redis channel this
    /// process has ever published or subscribed to into the matching local broadcast
    /// channel, so remote publishes reach local subscribers the same way local ones do.
    pub fn spawn_forwarder(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(err) = this.run_forwarder_once().await {
                    eprintln!("📡 redis bus forwarder disconnected: {err}, retrying in 5s");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        });
    }

    async fn run_forwarder_once(&self) -> redis::RedisResult<()> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.psubscribe("*").await?;
        let mut stream = pubsub.on_message();
        use futures_util::StreamExt;
        while let Some(msg) = stream.next().await {
            let channel: String = msg.get_channel_name().to_string();
            if let Ok(raw) = msg.get_payload::<String>() {
                if let Ok(payload) = serde_json::from_str::<Value>(&raw) {
                    let sender = self.local.sender_for(&channel);
                    let _ = sender.send(BusMessage { channel, payload });
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: Value) {
        let client = self.client.clone();
        let raw = serde_json::to_string(&payload).unwrap_or_default();
        let remote_channel = channel.to_string();
        self.breaker
            .execute_async(
                move || {
                    let client = client.clone();
                    let channel = remote_channel.clone();
                    let raw = raw.clone();
                    async move {
                        let mut conn = client.get_async_connection().await.map_err(|_| ())?;
                        redis::AsyncCommands::publish::<_, _, ()>(&mut conn, channel, raw)
                            .await
                            .map_err(|_| ())
                    }
                },
                || async {},
            )
            .await;

        // Local subscribers still see it immediately, independent of the Redis round-trip.
        self.local.publish(channel, payload).await;
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage> {
        self.local.subscribe(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_local_subscriber() {
        let bus = InProcessBus::new();
        let mut rx = bus.subscribe("global:broadcast");
        bus.publish("global:broadcast", serde_json::json!({"hello": "world"})).await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "global:broadcast");
    }

    #[tokio::test]
    async fn distinct_channels_do_not_cross() {
        let bus = InProcessBus::new();
        let mut room_a = bus.subscribe(&channel_room_messages("a"));
        bus.publish(&channel_room_messages("b"), serde_json::json!("hi")).await;
        assert!(room_a.try_recv().is_err());
    }
}
