use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use ripple_backbone::{Backbone, BackboneError, Subscription};

use crate::registry::ConnectionRegistry;

/// First retry delay after the backbone subscription drops.
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Retry delay ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bridges the backbone to the connection registry.
///
/// Every inbound client frame goes out through [`relay_inbound`]; everything
/// arriving on the subscribed channel is pushed to all registered
/// connections by the [`FanOutPump`]. There is no local short-circuit: a
/// gateway's own clients see their events only after the backbone echoes
/// them, so delivery semantics do not depend on the number of gateway
/// processes.
///
/// [`relay_inbound`]: FanOutBroadcaster::relay_inbound
pub struct FanOutBroadcaster<B> {
    inner: Arc<BroadcasterInner<B>>,
}

impl<B> Clone for FanOutBroadcaster<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct BroadcasterInner<B> {
    backbone: B,
    registry: ConnectionRegistry,
    channel: String,
    /// False until the subscription is up, and while it is being
    /// re-established. Publishes fail fast while false.
    connected: AtomicBool,
}

impl<B: Backbone> FanOutBroadcaster<B> {
    pub fn new(backbone: B, registry: ConnectionRegistry, channel: &str) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                backbone,
                registry,
                channel: channel.to_string(),
                connected: AtomicBool::new(false),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Publish a raw client frame to the shared channel, verbatim. The
    /// payload is opaque at this layer. Fails fast with
    /// [`BackboneError::Unavailable`] while the subscription is down rather
    /// than queueing unboundedly.
    pub async fn relay_inbound(&self, raw: Bytes) -> Result<(), BackboneError> {
        if !self.inner.connected.load(Ordering::Acquire) {
            return Err(BackboneError::Unavailable(
                "subscription down, refusing publish".to_string(),
            ));
        }
        self.inner.backbone.publish(&self.inner.channel, raw).await
    }

    /// Establish the subscription and hand back the pump that drains it.
    /// A failed initial subscribe is returned to the caller — the gateway
    /// cannot serve without it, so the caller treats it as fatal.
    pub async fn start(&self) -> Result<FanOutPump<B>, BackboneError> {
        let sub = self.inner.backbone.subscribe(&self.inner.channel).await?;
        self.inner.connected.store(true, Ordering::Release);
        info!("subscribed to fan-out channel {:?}", self.inner.channel);
        Ok(FanOutPump {
            broadcaster: self.clone(),
            sub,
        })
    }

    async fn resubscribe(&self) -> B::Subscription {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.inner.backbone.subscribe(&self.inner.channel).await {
                Ok(sub) => return sub,
                Err(e) => {
                    warn!("backbone resubscribe failed ({}), retrying in {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Drains the backbone subscription into the registry. Runs for the life of
/// the process; a subscription that ends triggers reconnect with backoff,
/// during which inbound publishes fail fast.
pub struct FanOutPump<B: Backbone> {
    broadcaster: FanOutBroadcaster<B>,
    sub: B::Subscription,
}

impl<B: Backbone> FanOutPump<B> {
    pub async fn run(mut self) {
        let inner = &self.broadcaster.inner;
        loop {
            match self.sub.next().await {
                Some(payload) => inner.registry.broadcast(payload).await,
                None => {
                    inner.connected.store(false, Ordering::Release);
                    warn!(
                        "fan-out subscription to {:?} ended, reconnecting",
                        inner.channel
                    );
                    self.sub = self.broadcaster.resubscribe().await;
                    inner.connected.store(true, Ordering::Release);
                    info!("fan-out subscription to {:?} re-established", inner.channel);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use tokio::sync::{broadcast, mpsc};

    use ripple_backbone::LocalBackbone;

    /// Backbone whose availability tests control: subscriptions can be
    /// severed and the whole service taken down.
    #[derive(Clone, Default)]
    struct TestBackbone {
        up: Arc<AtomicBool>,
        senders: Arc<Mutex<Vec<broadcast::Sender<Bytes>>>>,
    }

    impl TestBackbone {
        fn new() -> Self {
            Self {
                up: Arc::new(AtomicBool::new(true)),
                senders: Arc::default(),
            }
        }

        fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::Release);
        }

        /// End every live subscription.
        fn sever(&self) {
            self.senders.lock().unwrap().clear();
        }

        fn send_all(&self, payload: Bytes) {
            for tx in self.senders.lock().unwrap().iter() {
                let _ = tx.send(payload.clone());
            }
        }
    }

    impl Backbone for TestBackbone {
        type Subscription = TestSubscription;

        async fn publish(&self, _channel: &str, payload: Bytes) -> Result<(), BackboneError> {
            if !self.up.load(Ordering::Acquire) {
                return Err(BackboneError::Unavailable("test backbone down".into()));
            }
            self.send_all(payload);
            Ok(())
        }

        async fn subscribe(&self, _channel: &str) -> Result<TestSubscription, BackboneError> {
            if !self.up.load(Ordering::Acquire) {
                return Err(BackboneError::Unavailable("test backbone down".into()));
            }
            let (tx, rx) = broadcast::channel(64);
            self.senders.lock().unwrap().push(tx);
            Ok(TestSubscription { rx })
        }
    }

    struct TestSubscription {
        rx: broadcast::Receiver<Bytes>,
    }

    impl Subscription for TestSubscription {
        async fn next(&mut self) -> Option<Bytes> {
            self.rx.recv().await.ok()
        }
    }

    #[tokio::test]
    async fn test_initial_subscribe_failure_is_returned() {
        let backbone = TestBackbone::new();
        backbone.set_up(false);

        let broadcaster =
            FanOutBroadcaster::new(backbone, ConnectionRegistry::new(), "chat");
        assert!(broadcaster.start().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_fails_fast_before_start() {
        let broadcaster = FanOutBroadcaster::new(
            TestBackbone::new(),
            ConnectionRegistry::new(),
            "chat",
        );
        let err = broadcaster
            .relay_inbound(Bytes::from_static(b"hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackboneError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_pump_delivers_to_registered_connections() {
        let backbone = TestBackbone::new();
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(tx).await;

        let broadcaster = FanOutBroadcaster::new(backbone, registry, "chat");
        let pump = broadcaster.start().await.unwrap();
        tokio::spawn(pump.run());

        broadcaster
            .relay_inbound(Bytes::from_static(b"hi"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_subscription_ends() {
        let backbone = TestBackbone::new();
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(tx).await;

        let broadcaster = FanOutBroadcaster::new(backbone.clone(), registry, "chat");
        let pump = broadcaster.start().await.unwrap();
        tokio::spawn(pump.run());

        backbone.set_up(false);
        backbone.sever();
        tokio::task::yield_now().await;

        // while disconnected, publishes fail fast
        let err = broadcaster
            .relay_inbound(Bytes::from_static(b"hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackboneError::Unavailable(_)));

        backbone.set_up(true);
        // paused time auto-advances through the backoff sleeps
        loop {
            tokio::task::yield_now().await;
            if broadcaster.relay_inbound(Bytes::from_static(b"back")).await.is_ok() {
                break;
            }
            tokio::time::advance(Duration::from_millis(250)).await;
        }

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"back"));
    }

    #[tokio::test]
    async fn test_local_backbone_round_trip() {
        let backbone = LocalBackbone::new();
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(tx).await;

        let broadcaster = FanOutBroadcaster::new(backbone, registry, "chat");
        let pump = broadcaster.start().await.unwrap();
        tokio::spawn(pump.run());

        broadcaster
            .relay_inbound(Bytes::from_static(b"echo"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"echo"));
    }
}
