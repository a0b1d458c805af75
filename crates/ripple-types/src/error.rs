use thiserror::Error;

use crate::events::MessageKind;

/// An inbound payload that does not parse into the known event shape.
///
/// Malformed events are dropped and logged at the point of receipt, never
/// forwarded — one bad payload must not poison every subscriber.
#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event has an empty sender")]
    EmptySender,

    #[error("{kind} event missing required field `{field}`")]
    MissingPayload {
        kind: MessageKind,
        field: &'static str,
    },
}
