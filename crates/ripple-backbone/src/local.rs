use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

use crate::{Backbone, BackboneError, Subscription};

/// Payloads buffered per subscriber before the oldest are dropped as lag.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process backbone over tokio broadcast channels, keyed by channel name.
///
/// Publishing to a channel nobody subscribes to succeeds and goes nowhere,
/// matching pub/sub semantics. A subscriber that falls behind skips the
/// payloads it lost rather than ending the subscription.
#[derive(Clone, Default)]
pub struct LocalBackbone {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Bytes>>>>,
}

impl LocalBackbone {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        if let Some(tx) = self.channels.read().await.get(channel) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Backbone for LocalBackbone {
    type Subscription = LocalSubscription;

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackboneError> {
        // A send error only means no live subscribers on this channel.
        let _ = self.sender(channel).await.send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<LocalSubscription, BackboneError> {
        let rx = self.sender(channel).await.subscribe();
        Ok(LocalSubscription { rx })
    }
}

pub struct LocalSubscription {
    rx: broadcast::Receiver<Bytes>,
}

impl Subscription for LocalSubscription {
    async fn next(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("local backbone subscriber lagged by {} payloads", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let backbone = LocalBackbone::new();
        let mut a = backbone.subscribe("chat").await.unwrap();
        let mut b = backbone.subscribe("chat").await.unwrap();

        backbone.publish("chat", Bytes::from_static(b"hi")).await.unwrap();

        assert_eq!(a.next().await.unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(b.next().await.unwrap(), Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let backbone = LocalBackbone::new();
        backbone.publish("empty", Bytes::from_static(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let backbone = LocalBackbone::new();
        let mut chat = backbone.subscribe("chat").await.unwrap();
        let mut other = backbone.subscribe("other").await.unwrap();

        backbone.publish("chat", Bytes::from_static(b"hi")).await.unwrap();
        backbone.publish("other", Bytes::from_static(b"yo")).await.unwrap();

        assert_eq!(chat.next().await.unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(other.next().await.unwrap(), Bytes::from_static(b"yo"));
    }

    #[tokio::test]
    async fn test_subscription_starts_at_subscribe_time() {
        let backbone = LocalBackbone::new();
        // published before anyone subscribed: never delivered
        backbone.publish("chat", Bytes::from_static(b"early")).await.unwrap();

        let mut sub = backbone.subscribe("chat").await.unwrap();
        backbone.publish("chat", Bytes::from_static(b"late")).await.unwrap();

        assert_eq!(sub.next().await.unwrap(), Bytes::from_static(b"late"));
    }
}
