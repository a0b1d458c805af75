//! Client side of the ripple relay.
//!
//! The gateway redelivers, reorders across senders, and echoes a client's
//! own events back to it. This crate turns that raw stream into a
//! consistent view: [`StreamReconciler`] folds inbound events into message
//! history and presence, [`PresenceTracker`] keeps who-is-online and
//! who-is-typing, and [`ClientSession`] owns the socket and lifecycle.

pub mod presence;
pub mod reconciler;
pub mod session;

pub use presence::{PresenceTracker, TYPING_WINDOW};
pub use reconciler::{ChatMessage, StreamReconciler};
pub use session::{ClientSession, SessionError};
