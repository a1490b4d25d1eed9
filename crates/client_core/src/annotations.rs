//! Mutable per-message facets: reactions, pins, edits and deletion.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, UserId},
    protocol::ReactionSet,
};

use crate::{
    error::{SyncError, SyncResult},
    messages::{Message, MessageStore},
};

/// Optimistically sets the acting user's reaction, replacing any previous one.
pub fn react(
    store: &mut MessageStore,
    message_id: &MessageId,
    user_id: &UserId,
    reaction: &str,
) -> SyncResult<()> {
    let message = store
        .find_mut(message_id)
        .ok_or_else(|| SyncError::UnknownMessage(message_id.clone()))?;
    message.reactions.set(user_id.clone(), reaction);
    Ok(())
}

/// Optimistically clears the acting user's reaction.
pub fn remove_reaction(
    store: &mut MessageStore,
    message_id: &MessageId,
    user_id: &UserId,
) -> SyncResult<bool> {
    let message = store
        .find_mut(message_id)
        .ok_or_else(|| SyncError::UnknownMessage(message_id.clone()))?;
    Ok(message.reactions.remove(user_id))
}

/// Authoritative full replacement from `message_reacted`.
pub fn apply_reactions(store: &mut MessageStore, message_id: &MessageId, reactions: ReactionSet) -> bool {
    match store.find_mut(message_id) {
        Some(message) => {
            message.reactions = reactions;
            true
        }
        None => false,
    }
}

/// Confirmed edit: content, edited flag and timestamp.
pub fn apply_edit(
    store: &mut MessageStore,
    message_id: &MessageId,
    content: String,
    edited_at: DateTime<Utc>,
) -> bool {
    let Some(message) = store.find_mut(message_id) else {
        return false;
    };
    message.content = content;
    message.edited = true;
    message.edited_at = Some(edited_at);
    true
}

/// Removes a message and any pin pointing at it. Nothing is kept for rollback.
pub fn delete(
    store: &mut MessageStore,
    pins: &mut PinnedIndex,
    message_id: &MessageId,
) -> Option<Message> {
    let removed = store.remove(message_id)?;
    pins.forget_message(&removed);
    Some(removed)
}

/// Applies an authoritative pin or unpin to the message flag and the index.
pub fn apply_pin(
    store: &mut MessageStore,
    pins: &mut PinnedIndex,
    conversation_id: &ConversationId,
    message_id: &MessageId,
    pinned: bool,
) -> bool {
    // index under the stable local key so later lookups match either id
    let (key, flag_changed) = match store.find_mut(message_id) {
        Some(message) => {
            let changed = message.pinned != pinned;
            message.pinned = pinned;
            (message.id.clone(), changed)
        }
        None => (message_id.clone(), false),
    };
    let indexed = if pinned {
        pins.pin(conversation_id, key)
    } else {
        pins.unpin(conversation_id, &key)
    };
    flag_changed || indexed
}

/// Pinned message ids per conversation, deduplicated, in pin order.
#[derive(Debug, Default, Clone)]
pub struct PinnedIndex {
    by_conversation: HashMap<ConversationId, Vec<MessageId>>,
}

impl PinnedIndex {
    pub fn pin(&mut self, conversation_id: &ConversationId, message_id: MessageId) -> bool {
        let ids = self.by_conversation.entry(conversation_id.clone()).or_default();
        if ids.contains(&message_id) {
            return false;
        }
        ids.push(message_id);
        true
    }

    pub fn unpin(&mut self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        let Some(ids) = self.by_conversation.get_mut(conversation_id) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|id| id != message_id);
        before != ids.len()
    }

    pub fn ids(&self, conversation_id: &ConversationId) -> &[MessageId] {
        self.by_conversation
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Pinned messages of a conversation that are currently loaded: confirmed
    /// pins in pin order, then messages that arrived already flagged.
    pub fn resolve<'a>(
        &self,
        conversation_id: &ConversationId,
        store: &'a MessageStore,
    ) -> Vec<&'a Message> {
        let flagged = store
            .messages(conversation_id)
            .iter()
            .filter(|message| message.pinned);
        let mut pinned: Vec<&'a Message> = Vec::new();
        for message in self
            .ids(conversation_id)
            .iter()
            .filter_map(|id| store.find(id))
            .filter(|message| message.pinned && &message.conversation_id == conversation_id)
            .chain(flagged)
        {
            if !pinned.iter().any(|kept| kept.id == message.id) {
                pinned.push(message);
            }
        }
        pinned
    }

    fn forget_message(&mut self, message: &Message) {
        if let Some(ids) = self.by_conversation.get_mut(&message.conversation_id) {
            ids.retain(|id| !message.matches(id));
        }
    }

    pub fn purge(&mut self, conversation_id: &ConversationId) {
        self.by_conversation.remove(conversation_id);
    }
}

#[cfg(test)]
#[path = "tests/annotations_tests.rs"]
mod tests;
