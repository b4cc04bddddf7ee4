//! Topic-keyed in-process pub/sub for live progress streaming.
//!
//! Stage events fan out to SSE subscribers through broadcast channels, one
//! per topic. Publishing to a topic nobody watches is a no-op — progress
//! reporting never blocks on whether a client is connected. Channels are
//! bounded; a subscriber that falls behind loses the oldest events
//! (`RecvError::Lagged`) rather than back-pressuring the worker.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Topic carrying the stage events for one asset.
pub fn asset_topic(asset_id: Uuid) -> String {
    format!("asset:{asset_id}")
}

#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Serialize `event` and publish it to `topic`. No-op without
    /// subscribers; serialization failures are logged, never propagated.
    pub async fn publish<T: Serialize>(&self, topic: &str, event: &T) {
        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(error) => {
                warn!(topic, %error, "dropping unserializable stream event");
                return;
            }
        };
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(topic) {
            let _ = tx.send(value);
        }
    }

    /// Subscribe to a topic, creating its channel on first use.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop channels nobody subscribes to anymore.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    #[cfg(test)]
    pub(crate) async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let hub = StreamHub::new();
        let topic = asset_topic(Uuid::new_v4());
        let mut rx1 = hub.subscribe(&topic).await;
        let mut rx2 = hub.subscribe(&topic).await;

        hub.publish(&topic, &Ping { seq: 7 }).await;

        assert_eq!(rx1.recv().await.unwrap(), json!({"seq": 7}));
        assert_eq!(rx2.recv().await.unwrap(), json!({"seq": 7}));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = StreamHub::new();
        hub.publish("asset:nobody", &Ping { seq: 1 }).await;
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn cleanup_drops_abandoned_topics() {
        let hub = StreamHub::new();
        let rx = hub.subscribe("asset:ephemeral").await;
        assert_eq!(hub.topic_count().await, 1);

        drop(rx);
        hub.cleanup().await;
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let hub = StreamHub::with_capacity(2);
        let topic = asset_topic(Uuid::new_v4());
        let mut rx = hub.subscribe(&topic).await;

        for seq in 0..5 {
            hub.publish(&topic, &Ping { seq }).await;
        }

        // Oldest events were overwritten; the receiver reports the lag.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
