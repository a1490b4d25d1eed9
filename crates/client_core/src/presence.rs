//! Ephemeral online/offline and typing state, plus the outbound typing debouncer.

use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use shared::{
    domain::UserId,
    protocol::{ClientRequest, PresencePayload, Recipient},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presence {
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    presence: HashMap<UserId, Presence>,
    typing: BTreeSet<UserId>,
}

impl PresenceTracker {
    pub fn presence_of(&self, user_id: &UserId) -> Presence {
        self.presence.get(user_id).copied().unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.presence_of(user_id).online
    }

    /// Absolute snapshot: listed users take the given state, every other known
    /// user is marked offline.
    pub fn apply_snapshot<'a>(
        &mut self,
        snapshot: Vec<PresencePayload>,
        known_users: impl IntoIterator<Item = &'a UserId>,
    ) {
        for user_id in known_users {
            self.presence.entry(user_id.clone()).or_default();
        }
        for entry in self.presence.values_mut() {
            entry.online = false;
        }
        for item in snapshot {
            self.presence.insert(
                item.user_id,
                Presence {
                    online: item.is_online,
                    last_seen: item.last_seen,
                },
            );
        }
    }

    pub fn set_online(&mut self, user_id: UserId, online: bool, last_seen: Option<DateTime<Utc>>) {
        let entry = self.presence.entry(user_id).or_default();
        entry.online = online;
        if last_seen.is_some() {
            entry.last_seen = last_seen;
        }
    }

    /// Inbound typing flags have no local expiry; only an explicit stop clears them.
    pub fn set_typing(&mut self, user_id: UserId, typing: bool) -> bool {
        if typing {
            self.typing.insert(user_id)
        } else {
            self.typing.remove(&user_id)
        }
    }

    pub fn is_typing(&self, user_id: &UserId) -> bool {
        self.typing.contains(user_id)
    }

    pub fn typing_users(&self) -> impl Iterator<Item = &UserId> {
        self.typing.iter()
    }
}

/// Emits `typing` when the local user starts typing and a single
/// `stop_typing` once input has been quiet for the debounce window.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    window: Duration,
    active: Option<(Recipient, Instant)>,
}

impl TypingDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            active: None,
        }
    }

    /// Records a keystroke. Returns what has to be sent right now: a stop for a
    /// previous recipient when the target changed, then a start for the new one.
    pub fn keystroke(&mut self, recipient: Recipient, now: Instant) -> Vec<ClientRequest> {
        let mut out = Vec::new();
        match self.active.take() {
            Some((current, _)) if current == recipient => {}
            Some((previous, _)) => {
                out.push(ClientRequest::StopTyping {
                    recipient: previous,
                });
                out.push(ClientRequest::Typing {
                    recipient: recipient.clone(),
                    is_typing: true,
                });
            }
            None => out.push(ClientRequest::Typing {
                recipient: recipient.clone(),
                is_typing: true,
            }),
        }
        self.active = Some((recipient, now + self.window));
        out
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Returns the pending `stop_typing` once the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<ClientRequest> {
        match &self.active {
            Some((_, deadline)) if *deadline <= now => self
                .active
                .take()
                .map(|(recipient, _)| ClientRequest::StopTyping { recipient }),
            _ => None,
        }
    }

    /// Stops immediately, e.g. when the message is sent.
    pub fn flush(&mut self) -> Option<ClientRequest> {
        self.active
            .take()
            .map(|(recipient, _)| ClientRequest::StopTyping { recipient })
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
