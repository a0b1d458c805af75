//! Shared wire types for the ripple relay.
//!
//! Everything that crosses the gateway — from a client, through the
//! backbone, back out to every connected client — is a [`ChatEvent`].

pub mod error;
pub mod events;

pub use error::MalformedEvent;
pub use events::{ChatEvent, DedupKey, MessageKind};
