use std::collections::HashMap;

use tokio::time::{Duration, Instant};

/// How long a typing indicator stays lit without a fresh typing event.
pub const TYPING_WINDOW: Duration = Duration::from_secs(2);

/// Who is present and who is typing, derived entirely from the event
/// stream.
///
/// Presence is not authoritative: there is no heartbeat, so a participant
/// who disconnects without sending a leave event stays listed. Typing state
/// is one resettable deadline per sender — a fresh typing event re-arms the
/// deadline in place, so a burst of events never creates overlapping timers
/// that clear the indicator early.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Display names in join order.
    online: Vec<String>,
    /// Sender -> moment their typing indicator goes dark.
    typing: HashMap<String, Instant>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name` to the presence set. Returns false if they were already
    /// present (idempotent join).
    pub fn mark_join(&mut self, name: &str) -> bool {
        if self.online.iter().any(|n| n == name) {
            return false;
        }
        self.online.push(name.to_string());
        true
    }

    /// Remove `name` from the presence set. Returns false if they were not
    /// present (removing an absent sender is a no-op).
    pub fn mark_leave(&mut self, name: &str) -> bool {
        self.typing.remove(name);
        match self.online.iter().position(|n| n == name) {
            Some(i) => {
                self.online.remove(i);
                true
            }
            None => false,
        }
    }

    /// Arm (or re-arm) `name`'s typing indicator for the full window.
    pub fn mark_typing(&mut self, name: &str) {
        self.typing
            .insert(name.to_string(), Instant::now() + TYPING_WINDOW);
    }

    pub fn is_typing(&self, name: &str) -> bool {
        self.typing.get(name).is_some_and(|&deadline| deadline > Instant::now())
    }

    /// Names currently shown as typing.
    pub fn typing_names(&self) -> Vec<String> {
        let now = Instant::now();
        self.typing
            .iter()
            .filter(|&(_, &deadline)| deadline > now)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The earliest typing deadline still armed, for the session loop to
    /// sleep until. None when nobody is typing.
    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.typing.values().copied().min()
    }

    /// Drop expired typing entries.
    pub fn expire_typing(&mut self) {
        let now = Instant::now();
        self.typing.retain(|_, &mut deadline| deadline > now);
    }

    pub fn online_names(&self) -> &[String] {
        &self.online
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.online.iter().any(|n| n == name)
    }
}
