use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MalformedEvent;

/// The kind of a relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Join,
    Leave,
    Typing,
    Text,
    Audio,
    File,
}

impl MessageKind {
    /// The wire name, as it appears in the `kind` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Typing => "typing",
            Self::Text => "text",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of exchange on the relay channel.
///
/// Events are immutable once built. The relay assigns no sequence number
/// and no server-side id; instead every locally-originated event carries a
/// v4 uuid assigned at construction, which receivers prefer as the dedup
/// key. Events from publishers that omit the id still deduplicate by the
/// content tuple (see [`ChatEvent::dedup_key`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub sender: String,
    pub kind: MessageKind,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// Key under which previously-seen events are recognized and suppressed.
///
/// Content-tuple dedup is fragile (two identical messages at the same
/// timestamp collide), so origination-assigned ids win when present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Id(Uuid),
    Content {
        sender: String,
        kind: MessageKind,
        time: DateTime<Utc>,
        body: String,
    },
}

impl ChatEvent {
    fn base(sender: &str, kind: MessageKind) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            sender: sender.to_string(),
            kind,
            time: Utc::now(),
            text: None,
            audio_url: None,
            file_url: None,
            file_name: None,
            file_type: None,
        }
    }

    pub fn join(sender: &str) -> Self {
        Self::base(sender, MessageKind::Join)
    }

    pub fn leave(sender: &str) -> Self {
        Self::base(sender, MessageKind::Leave)
    }

    pub fn typing(sender: &str) -> Self {
        Self::base(sender, MessageKind::Typing)
    }

    pub fn text(sender: &str, body: &str) -> Self {
        let mut event = Self::base(sender, MessageKind::Text);
        event.text = Some(body.to_string());
        event
    }

    pub fn audio(sender: &str, url: &str) -> Self {
        let mut event = Self::base(sender, MessageKind::Audio);
        event.audio_url = Some(url.to_string());
        event
    }

    pub fn file(sender: &str, url: &str, name: Option<&str>, mime: Option<&str>) -> Self {
        let mut event = Self::base(sender, MessageKind::File);
        event.file_url = Some(url.to_string());
        event.file_name = name.map(|s| s.to_string());
        event.file_type = mime.map(|s| s.to_string());
        event
    }

    /// Decode and shape-check an inbound frame.
    ///
    /// Payload requirements per kind: `text` must carry `text`, `audio` must
    /// carry `audioUrl`, `file` must carry `fileUrl`. Join/leave/typing have
    /// no payload beyond the sender.
    pub fn parse(raw: &str) -> Result<Self, MalformedEvent> {
        let event: ChatEvent = serde_json::from_str(raw)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), MalformedEvent> {
        if self.sender.trim().is_empty() {
            return Err(MalformedEvent::EmptySender);
        }
        let missing = match self.kind {
            MessageKind::Text => self.text.is_none().then_some("text"),
            MessageKind::Audio => self.audio_url.is_none().then_some("audioUrl"),
            MessageKind::File => self.file_url.is_none().then_some("fileUrl"),
            _ => None,
        };
        match missing {
            Some(field) => Err(MalformedEvent::MissingPayload {
                kind: self.kind,
                field,
            }),
            None => Ok(()),
        }
    }

    /// True for the kinds that land in message history (and therefore
    /// participate in dedup): text, audio, file.
    pub fn is_content(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::Text | MessageKind::Audio | MessageKind::File
        )
    }

    pub fn dedup_key(&self) -> DedupKey {
        if let Some(id) = self.id {
            return DedupKey::Id(id);
        }
        let body = match self.kind {
            MessageKind::Text => self.text.as_deref(),
            MessageKind::Audio => self.audio_url.as_deref(),
            MessageKind::File => self.file_url.as_deref(),
            _ => None,
        };
        DedupKey::Content {
            sender: self.sender.clone(),
            kind: self.kind,
            time: self.time,
            body: body.unwrap_or_default().to_string(),
        }
    }

    /// Serialize for the wire. `ChatEvent` has no fallible fields under
    /// serde_json, so this cannot fail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ChatEvent serialization is infallible")
    }
}
