use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ripple_types::{ChatEvent, DedupKey, MalformedEvent, MessageKind};

use crate::presence::PresenceTracker;

/// A reconciled history entry: a relayed user event, or a synthetic system
/// line derived from join/leave.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System { text: String, time: DateTime<Utc> },
    User(ChatEvent),
}

impl ChatMessage {
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::System { .. } => None,
            Self::User(event) => Some(&event.sender),
        }
    }
}

/// Folds the inbound event stream — possibly duplicated, not globally
/// ordered across senders — into local message history and presence.
///
/// The gateway echoes a client's own events back to it; the reconciler
/// treats that self-echo as the canonical arrival. Nothing is appended
/// optimistically at send time, so there is no optimistic-vs-echo matching
/// to get wrong: every content event lands in history exactly once, keyed
/// by [`ChatEvent::dedup_key`].
#[derive(Debug)]
pub struct StreamReconciler {
    local_name: String,
    history: Vec<ChatMessage>,
    seen: HashSet<DedupKey>,
    presence: PresenceTracker,
}

impl StreamReconciler {
    pub fn new(local_name: &str) -> Self {
        Self {
            local_name: local_name.to_string(),
            history: Vec::new(),
            seen: HashSet::new(),
            presence: PresenceTracker::new(),
        }
    }

    /// Decode one raw inbound frame and fold it in. A malformed frame is
    /// logged and dropped; it never affects history and never aborts the
    /// loop.
    pub fn handle_frame(&mut self, raw: &str) {
        match ChatEvent::parse(raw) {
            Ok(event) => self.apply(event),
            Err(e @ MalformedEvent::Json(_)) => warn!("dropping undecodable frame: {}", e),
            Err(e) => warn!("dropping malformed frame: {}", e),
        }
    }

    /// Fold one event into local state. Idempotent for every kind: applying
    /// the same event twice leaves history and presence exactly as once.
    pub fn apply(&mut self, event: ChatEvent) {
        match event.kind {
            MessageKind::Join => {
                if self.presence.mark_join(&event.sender) {
                    self.push_system(format!("{} joined the chat", event.sender), event.time);
                }
            }
            MessageKind::Leave => {
                if self.presence.mark_leave(&event.sender) {
                    self.push_system(format!("{} left the chat", event.sender), event.time);
                }
            }
            MessageKind::Typing => {
                // Our own typing events come back through the relay like
                // everyone else's; filter by sender identity, not by
                // suppressing the send.
                if event.sender != self.local_name {
                    self.presence.mark_typing(&event.sender);
                }
            }
            MessageKind::Text | MessageKind::Audio | MessageKind::File => {
                let key = event.dedup_key();
                if self.seen.insert(key) {
                    self.history.push(ChatMessage::User(event));
                } else {
                    debug!("duplicate {} event from {}, ignoring", event.kind, event.sender);
                }
            }
        }
    }

    fn push_system(&mut self, text: String, time: DateTime<Utc>) {
        self.history.push(ChatMessage::System { text, time });
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn online_names(&self) -> &[String] {
        self.presence.online_names()
    }

    pub fn is_typing(&self, name: &str) -> bool {
        self.presence.is_typing(name)
    }

    /// Drop typing indicators whose deadline has passed. Driven by the
    /// session loop as deadlines expire.
    pub fn expire_typing(&mut self) {
        self.presence.expire_typing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idless(mut event: ChatEvent) -> ChatEvent {
        event.id = None;
        event
    }

    #[test]
    fn test_join_adds_presence_and_system_message() {
        let mut rec = StreamReconciler::new("bob");
        rec.apply(ChatEvent::join("alice"));

        assert_eq!(rec.online_names(), ["alice"]);
        assert!(matches!(
            &rec.history()[0],
            ChatMessage::System { text, .. } if text == "alice joined the chat"
        ));
    }

    #[test]
    fn test_redelivered_join_is_ignored() {
        let mut rec = StreamReconciler::new("bob");
        let join = ChatEvent::join("alice");
        rec.apply(join.clone());
        rec.apply(join.clone());
        rec.apply(join);

        assert_eq!(rec.online_names(), ["alice"]);
        assert_eq!(rec.history().len(), 1);
    }

    #[test]
    fn test_leave_removes_presence_once() {
        let mut rec = StreamReconciler::new("bob");
        rec.apply(ChatEvent::join("alice"));
        let leave = ChatEvent::leave("alice");
        rec.apply(leave.clone());
        rec.apply(leave);

        assert!(rec.online_names().is_empty());
        // joined + left, no duplicate announcement
        assert_eq!(rec.history().len(), 2);
    }

    #[test]
    fn test_duplicate_content_never_grows_history() {
        let mut rec = StreamReconciler::new("bob");
        let text = ChatEvent::text("alice", "hi");
        rec.apply(text.clone());
        rec.apply(text.clone());
        rec.apply(text);

        assert_eq!(rec.history().len(), 1);
    }

    #[test]
    fn test_idless_duplicates_dedup_by_content_tuple() {
        let mut rec = StreamReconciler::new("bob");
        let text = idless(ChatEvent::text("alice", "hi"));
        rec.apply(text.clone());
        rec.apply(text);

        assert_eq!(rec.history().len(), 1);
    }

    #[test]
    fn test_self_echo_lands_exactly_once() {
        let mut rec = StreamReconciler::new("bob");
        let own = ChatEvent::text("bob", "my own message");
        // no optimistic append at send time; the echo is the sole arrival
        rec.apply(own.clone());
        assert_eq!(rec.history().len(), 1);
        // the gateway may redeliver the echo
        rec.apply(own);
        assert_eq!(rec.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_typing_echo_is_filtered() {
        let mut rec = StreamReconciler::new("bob");
        rec.apply(ChatEvent::typing("bob"));
        assert!(!rec.is_typing("bob"));

        rec.apply(ChatEvent::typing("alice"));
        assert!(rec.is_typing("alice"));
    }

    #[test]
    fn test_malformed_frame_leaves_history_untouched() {
        let mut rec = StreamReconciler::new("bob");
        rec.handle_frame("{not json");
        rec.handle_frame(r#"{"sender":"","kind":"join","time":"2026-08-30T10:00:00Z"}"#);
        rec.handle_frame(r#"{"sender":"alice","kind":"text","time":"2026-08-30T10:00:00Z"}"#);

        assert!(rec.history().is_empty());
        assert!(rec.online_names().is_empty());
    }

    #[test]
    fn test_audio_and_file_dedup_by_reference() {
        let mut rec = StreamReconciler::new("bob");
        let audio = idless(ChatEvent::audio("alice", "https://files/a.ogg"));
        let file = idless(ChatEvent::file("alice", "https://files/b.pdf", Some("b.pdf"), None));
        rec.apply(audio.clone());
        rec.apply(audio);
        rec.apply(file.clone());
        rec.apply(file);

        assert_eq!(rec.history().len(), 2);
    }

    // alice joins, says hi, and the backbone redelivers the join once more
    #[test]
    fn test_join_then_text_with_redelivery() {
        let mut rec = StreamReconciler::new("bob");
        let join = ChatEvent::join("alice");
        let hi = ChatEvent::text("alice", "hi");

        rec.apply(join.clone());
        rec.apply(hi);
        rec.apply(join); // backbone redelivery

        assert_eq!(rec.online_names(), ["alice"]);
        let history = rec.history();
        assert_eq!(history.len(), 2);
        assert!(matches!(
            &history[0],
            ChatMessage::System { text, .. } if text == "alice joined the chat"
        ));
        assert!(matches!(
            &history[1],
            ChatMessage::User(event) if event.sender == "alice"
                && event.text.as_deref() == Some("hi")
        ));
    }
}
