//! The set of direct and group conversations with preview and unread state.

use std::collections::{BTreeMap, BTreeSet};

use shared::{
    domain::{ConversationId, ConversationKind, UserId},
    protocol::{ConversationPayload, MessagePreview, Recipient},
};

use crate::membership::GroupMembership;

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub avatar: Option<String>,
    /// Direct conversations only: the other side(s). Groups use `membership`.
    pub counterparts: BTreeSet<UserId>,
    pub membership: Option<GroupMembership>,
    pub last_message: Option<MessagePreview>,
    pub unread_count: u32,
}

impl Conversation {
    pub fn direct(counterpart: UserId) -> Self {
        Self {
            id: ConversationId::from(&counterpart),
            kind: ConversationKind::Direct,
            name: None,
            avatar: None,
            counterparts: BTreeSet::from([counterpart]),
            membership: None,
            last_message: None,
            unread_count: 0,
        }
    }

    pub fn from_payload(payload: ConversationPayload, me: &UserId) -> Self {
        let is_group = payload.is_group || !payload.participants_status.is_empty();
        if is_group {
            let membership = GroupMembership::from_announcement(
                payload.created_by.clone(),
                &payload.participants,
                &payload.participants_status,
            );
            return Self {
                id: payload.id,
                kind: ConversationKind::Group,
                name: payload.name,
                avatar: payload.avatar,
                counterparts: BTreeSet::new(),
                membership: Some(membership),
                last_message: payload.last_message,
                unread_count: payload.unread_count,
            };
        }

        let mut counterparts: BTreeSet<UserId> = payload
            .participants
            .into_iter()
            .filter(|participant| participant != me)
            .collect();
        if counterparts.is_empty() {
            // user-list entries are keyed by the other user's id
            counterparts.insert(UserId::new(payload.id.as_str()));
        }
        Self {
            id: payload.id,
            kind: ConversationKind::Direct,
            name: payload.name,
            avatar: payload.avatar,
            counterparts,
            membership: None,
            last_message: payload.last_message,
            unread_count: payload.unread_count,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    /// The counterpart of a direct conversation.
    pub fn counterpart(&self) -> Option<&UserId> {
        self.counterparts.iter().next()
    }

    /// Users taking part in the conversation.
    pub fn participants(&self) -> Vec<&UserId> {
        match &self.membership {
            Some(membership) => membership.participants().collect(),
            None => self.counterparts.iter().collect(),
        }
    }

    /// Addressing for outbound events about this conversation.
    pub fn recipient(&self) -> Recipient {
        match (self.kind, self.counterpart()) {
            (ConversationKind::Direct, Some(user)) => Recipient::user(user.clone()),
            _ => Recipient::group(self.id.clone()),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConversationDirectory {
    conversations: BTreeMap<ConversationId, Conversation>,
}

impl ConversationDirectory {
    /// Seeds state from the initial directory fetch; fetched entries win.
    pub fn upsert_from_directory_fetch(
        &mut self,
        list: Vec<ConversationPayload>,
        me: &UserId,
    ) -> usize {
        let mut count = 0;
        for payload in list {
            if !payload.is_group && payload.id.as_str() == me.as_str() {
                continue;
            }
            let conversation = Conversation::from_payload(payload, me);
            self.conversations
                .insert(conversation.id.clone(), conversation);
            count += 1;
        }
        count
    }

    pub fn insert(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.get_mut(id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn remove(&mut self, id: &ConversationId) -> Option<Conversation> {
        self.conversations.remove(id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    /// The direct conversation whose counterpart is `user_id`.
    pub fn direct_with(&self, user_id: &UserId) -> Option<&ConversationId> {
        self.conversations
            .values()
            .find(|conversation| {
                conversation.kind == ConversationKind::Direct
                    && conversation.counterparts.contains(user_id)
            })
            .map(|conversation| &conversation.id)
    }

    /// Looks up or creates the direct conversation with `user_id`.
    pub fn ensure_direct(&mut self, user_id: &UserId) -> ConversationId {
        if let Some(id) = self.direct_with(user_id) {
            return id.clone();
        }
        let conversation = Conversation::direct(user_id.clone());
        let id = conversation.id.clone();
        self.conversations.insert(id.clone(), conversation);
        id
    }

    /// Resolves a conversation from an explicit id or, failing that, from the
    /// participant list of a direct conversation.
    pub fn resolve(
        &self,
        conversation_id: Option<&ConversationId>,
        participants: &[UserId],
        me: &UserId,
    ) -> Option<ConversationId> {
        if let Some(id) = conversation_id.filter(|id| self.contains(id)) {
            return Some(id.clone());
        }
        participants
            .iter()
            .filter(|participant| *participant != me)
            .find_map(|participant| self.direct_with(participant))
            .cloned()
    }

    /// Overwrites the preview with the server's value; server time is authoritative.
    pub fn apply_last_message_update(
        &mut self,
        id: &ConversationId,
        preview: Option<MessagePreview>,
    ) -> bool {
        let Some(conversation) = self.conversations.get_mut(id) else {
            return false;
        };
        conversation.last_message = preview;
        true
    }

    pub fn increment_unread(&mut self, id: &ConversationId) -> Option<u32> {
        let conversation = self.conversations.get_mut(id)?;
        conversation.unread_count = conversation.unread_count.saturating_add(1);
        Some(conversation.unread_count)
    }

    /// Authoritative absolute count from the server.
    pub fn set_unread(&mut self, id: &ConversationId, count: u32) -> bool {
        let Some(conversation) = self.conversations.get_mut(id) else {
            return false;
        };
        conversation.unread_count = count;
        true
    }

    pub fn clear_unread(&mut self, id: &ConversationId) -> bool {
        self.set_unread(id, 0)
    }

    /// Every user referenced by any conversation.
    pub fn known_users(&self) -> BTreeSet<UserId> {
        self.conversations
            .values()
            .flat_map(|conversation| conversation.participants())
            .cloned()
            .collect()
    }

    /// Presentation order: most recent preview first, then by id.
    pub fn ordered(&self) -> Vec<&Conversation> {
        let mut conversations: Vec<&Conversation> = self.conversations.values().collect();
        conversations.sort_by(|a, b| {
            let a_time = a.last_message.as_ref().and_then(|preview| preview.timestamp);
            let b_time = b.last_message.as_ref().and_then(|preview| preview.timestamp);
            b_time.cmp(&a_time).then_with(|| a.id.cmp(&b.id))
        });
        conversations
    }
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
