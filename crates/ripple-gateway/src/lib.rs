//! Server side of the ripple relay.
//!
//! A gateway process accepts WebSocket connections, publishes every inbound
//! frame to the shared backbone channel, and delivers everything arriving on
//! that channel to all currently registered connections. Delivery always
//! round-trips through the backbone — locally-originated events are never
//! short-circuited to local connections — so semantics are identical whether
//! one gateway process is running or many.

pub mod broadcaster;
pub mod connection;
pub mod registry;

pub use broadcaster::{FanOutBroadcaster, FanOutPump};
pub use registry::{ConnError, ConnToken, ConnectionRegistry};
