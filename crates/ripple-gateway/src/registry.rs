use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A single connection's transport failed. Local to that connection: it
/// triggers unregistration and never interrupts delivery to the rest.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

/// Opaque process-local token naming one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnToken(u64);

impl fmt::Display for ConnToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ConnectionHandle {
    /// Bounded queue drained by the connection's own send task — the single
    /// serialized send path for that connection.
    tx: mpsc::Sender<Bytes>,
    alive: AtomicBool,
}

/// Tracks live connections and their liveness. Knows nothing about message
/// content; payloads pass through as opaque bytes.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    connections: RwLock<HashMap<u64, ConnectionHandle>>,
    next_token: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue. Returns the token used to
    /// unregister it later.
    pub async fn register(&self, tx: mpsc::Sender<Bytes>) -> ConnToken {
        let token = ConnToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let handle = ConnectionHandle {
            tx,
            alive: AtomicBool::new(true),
        };
        self.inner.connections.write().await.insert(token.0, handle);
        debug!("registered connection {}", token);
        token
    }

    /// Remove a connection. Unknown or already-removed tokens are a no-op,
    /// so double-close is harmless.
    pub async fn unregister(&self, token: ConnToken) {
        if self.inner.connections.write().await.remove(&token.0).is_some() {
            debug!("unregistered connection {}", token);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.connections.read().await.is_empty()
    }

    /// Apply `f` to every live connection, skipping any whose liveness flag
    /// flipped during iteration. A failed send marks that connection dead
    /// and unregisters it; it never aborts delivery to the remainder.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ConnToken, &mpsc::Sender<Bytes>) -> Result<(), ConnError>,
    {
        let mut dead = Vec::new();
        {
            let connections = self.inner.connections.read().await;
            for (&id, handle) in connections.iter() {
                if !handle.alive.load(Ordering::Acquire) {
                    continue;
                }
                if let Err(e) = f(ConnToken(id), &handle.tx) {
                    warn!("dropping connection {}: {}", ConnToken(id), e);
                    handle.alive.store(false, Ordering::Release);
                    dead.push(id);
                }
            }
        }
        if !dead.is_empty() {
            let mut connections = self.inner.connections.write().await;
            for id in dead {
                connections.remove(&id);
            }
        }
    }

    /// Queue `payload` on every live connection. A connection whose queue is
    /// full or closed is dropped (bounded-queue backpressure policy) while
    /// the rest keep receiving.
    pub async fn broadcast(&self, payload: Bytes) {
        self.for_each(|_, tx| match tx.try_send(payload.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ConnError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ConnError::Closed),
        })
        .await;
    }
}
