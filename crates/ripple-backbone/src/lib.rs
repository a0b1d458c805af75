//! The publish/subscribe backbone the relay fans out through.
//!
//! The backbone is a black box to the gateway: `publish` a payload to a
//! named channel, `subscribe` to receive everything published to that
//! channel after subscription start. Per-subscriber delivery order follows
//! publish order on each publisher's path, but there is no global order
//! across publishers and no replay of history.
//!
//! [`LocalBackbone`] is the in-process implementation used by the
//! single-process server and by tests; a networked deployment plugs its own
//! implementation in behind the same traits.

use std::future::Future;

use bytes::Bytes;
use thiserror::Error;

pub mod local;

pub use local::LocalBackbone;

/// The backbone cannot be reached. Fatal at startup (the gateway cannot
/// serve without its subscription), recoverable with backoff at runtime.
#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("backbone unavailable: {0}")]
    Unavailable(String),
}

/// A publish/subscribe service scoped to named broadcast channels.
pub trait Backbone: Send + Sync + 'static {
    type Subscription: Subscription;

    /// Publish `payload` verbatim to `channel`. Must not block beyond the
    /// backbone's own publish latency; an unreachable backbone fails with
    /// [`BackboneError::Unavailable`] rather than queueing.
    fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), BackboneError>> + Send;

    /// Open a subscription to `channel`, delivering every payload published
    /// after this call returns.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Self::Subscription, BackboneError>> + Send;
}

/// A live subscription: a lazy, infinite sequence of payloads.
pub trait Subscription: Send + 'static {
    /// The next payload. `None` means the subscription ended and must be
    /// re-established by the caller (reconnect-with-backoff lives above
    /// this layer).
    fn next(&mut self) -> impl Future<Output = Option<Bytes>> + Send;
}
