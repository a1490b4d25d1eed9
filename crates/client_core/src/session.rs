//! The session aggregate and its reconciliation functions.
//!
//! Everything here is synchronous and side-effect free apart from mutating
//! `SessionState`: inbound events and local actions go in, [`Effects`] (the
//! outbound requests and notices they imply) come out. The engine task owns the
//! only instance and performs the effects.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, MessageKind, MessageStatus, UserId},
    protocol::{
        ClientRequest, ConversationPayload, MessagePayload, MessagePreview, Recipient,
        RejectionPayload, ServerEvent,
    },
};
use tracing::{debug, warn};

use crate::{
    annotations::{self, PinnedIndex},
    directory::{Conversation, ConversationDirectory},
    error::{Notice, NoticeKind, SyncError, SyncResult},
    membership::GroupMembership,
    messages::{InboundOutcome, Message, MessageStore, OutgoingMessage},
    presence::PresenceTracker,
};

/// What applying an event or action requires of the outside world.
#[derive(Debug, Default, Clone, PartialEq)]
#[must_use]
pub struct Effects {
    pub outbound: Vec<ClientRequest>,
    pub notices: Vec<Notice>,
    pub changed: bool,
}

impl Effects {
    fn changed() -> Self {
        Self {
            changed: true,
            ..Self::default()
        }
    }

    fn unchanged() -> Self {
        Self::default()
    }

    fn notice(kind: NoticeKind, rejection: RejectionPayload) -> Self {
        Self {
            notices: vec![Notice {
                kind,
                message: rejection.message,
                conversation_id: rejection.conversation_id,
                message_id: rejection.message_id,
            }],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    me: UserId,
    active: Option<ConversationId>,
    directory: ConversationDirectory,
    messages: MessageStore,
    presence: PresenceTracker,
    pins: PinnedIndex,
    seen_requested: HashSet<MessageId>,
}

impl SessionState {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            active: None,
            directory: ConversationDirectory::default(),
            messages: MessageStore::default(),
            presence: PresenceTracker::default(),
            pins: PinnedIndex::default(),
            seen_requested: HashSet::new(),
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn pinned(&self, conversation_id: &ConversationId) -> Vec<&Message> {
        self.pins.resolve(conversation_id, &self.messages)
    }

    pub fn upsert_directory(&mut self, list: Vec<ConversationPayload>) -> usize {
        self.directory.upsert_from_directory_fetch(list, &self.me)
    }

    /// Makes a conversation active: clears its unread count, tells the server,
    /// and marks what is already loaded as seen.
    pub fn select_conversation(&mut self, conversation_id: &ConversationId) -> SyncResult<Effects> {
        let conversation = self
            .directory
            .get(conversation_id)
            .ok_or_else(|| SyncError::UnknownConversation(conversation_id.clone()))?;

        let (open_chat, reset) = match (conversation.is_group(), conversation.counterpart()) {
            (false, Some(user)) => (
                ClientRequest::OpenChat {
                    selected_user_id: Some(user.clone()),
                    conversation_id: None,
                },
                ClientRequest::ResetUnreadCount {
                    user_id: Some(user.clone()),
                    conversation_id: None,
                },
            ),
            _ => (
                ClientRequest::OpenChat {
                    selected_user_id: None,
                    conversation_id: Some(conversation_id.clone()),
                },
                ClientRequest::ResetUnreadCount {
                    user_id: None,
                    conversation_id: Some(conversation_id.clone()),
                },
            ),
        };

        self.active = Some(conversation_id.clone());
        self.directory.clear_unread(conversation_id);

        let mut effects = Effects::changed();
        effects.outbound.push(open_chat);
        effects.outbound.push(reset);
        effects.outbound.extend(self.seen_requests(conversation_id));
        Ok(effects)
    }

    /// Optimistically appends a message to the active conversation.
    pub fn send_message(
        &mut self,
        content: &str,
        kind: MessageKind,
        reply_to: Option<MessageId>,
        client_id: MessageId,
        now: DateTime<Utc>,
    ) -> SyncResult<(MessageId, ClientRequest)> {
        if content.trim().is_empty() {
            return Err(SyncError::EmptyContent);
        }
        let conversation_id = self.active.clone().ok_or(SyncError::NoActiveConversation)?;
        let recipient = self.conversation(&conversation_id)?.recipient();

        let id = self.messages.send_optimistic(
            OutgoingMessage {
                conversation_id,
                sender_id: self.me.clone(),
                content: content.to_string(),
                kind,
                reply_to: reply_to.clone(),
            },
            client_id,
            now,
        );
        let request = ClientRequest::SendMessage {
            client_id: id.clone(),
            sender_id: self.me.clone(),
            recipient,
            content: content.to_string(),
            kind,
            reply_to_message_id: reply_to,
        };
        Ok((id, request))
    }

    pub fn react(&mut self, message_id: &MessageId, reaction: &str) -> SyncResult<ClientRequest> {
        let (wire_id, recipient) = self.addressing(message_id)?;
        annotations::react(&mut self.messages, message_id, &self.me, reaction)?;
        Ok(ClientRequest::ReactToMessage {
            message_id: wire_id,
            recipient,
            reaction: reaction.to_string(),
        })
    }

    pub fn remove_reaction(&mut self, message_id: &MessageId) -> SyncResult<ClientRequest> {
        let (wire_id, recipient) = self.addressing(message_id)?;
        annotations::remove_reaction(&mut self.messages, message_id, &self.me)?;
        Ok(ClientRequest::RemoveReaction {
            message_id: wire_id,
            recipient,
        })
    }

    /// Who typing indicators for the active conversation go to.
    pub fn typing_target(&self) -> SyncResult<Recipient> {
        let conversation_id = self.active.as_ref().ok_or(SyncError::NoActiveConversation)?;
        Ok(self.conversation(conversation_id)?.recipient())
    }

    pub fn create_group(&self, name: &str, participants: Vec<UserId>) -> SyncResult<ClientRequest> {
        if name.trim().is_empty() {
            return Err(SyncError::EmptyContent);
        }
        Ok(ClientRequest::CreateGroup {
            group_name: name.trim().to_string(),
            participants,
        })
    }

    pub fn join_group(&self, conversation_id: &ConversationId) -> SyncResult<ClientRequest> {
        self.group(conversation_id)?;
        Ok(ClientRequest::JoinGroup {
            group_id: conversation_id.clone(),
        })
    }

    /// Removal happens on `leave_group_response`, not here.
    pub fn leave_group(&self, conversation_id: &ConversationId) -> SyncResult<ClientRequest> {
        self.group(conversation_id)?;
        Ok(ClientRequest::LeaveGroup {
            conversation_id: conversation_id.clone(),
        })
    }

    pub fn add_users(
        &self,
        conversation_id: &ConversationId,
        participants: Vec<UserId>,
    ) -> SyncResult<ClientRequest> {
        self.group(conversation_id)?;
        Ok(ClientRequest::AddUsersToGroup {
            conversation_id: conversation_id.clone(),
            participants,
        })
    }

    pub fn remove_users(
        &self,
        conversation_id: &ConversationId,
        participants: Vec<UserId>,
    ) -> SyncResult<ClientRequest> {
        self.group(conversation_id)?;
        Ok(ClientRequest::RemoveUsersFromGroup {
            conversation_id: conversation_id.clone(),
            participants,
        })
    }

    pub fn delete_group(&self, conversation_id: &ConversationId) -> SyncResult<ClientRequest> {
        self.group(conversation_id)?;
        Ok(ClientRequest::DeleteGroup {
            conversation_id: conversation_id.clone(),
        })
    }

    /// Speculative: content changes only when `message_edited` arrives.
    pub fn edit_message(&self, message_id: &MessageId, new_content: &str) -> SyncResult<ClientRequest> {
        if new_content.trim().is_empty() {
            return Err(SyncError::EmptyContent);
        }
        let message = self.message(message_id)?;
        Ok(ClientRequest::EditMessage {
            message_id: message.wire_id().clone(),
            new_content: new_content.to_string(),
            editor_id: self.me.clone(),
        })
    }

    /// Pins change only when the server confirms.
    pub fn pin_message(&self, message_id: &MessageId, pinned: bool) -> SyncResult<ClientRequest> {
        let message = self.message(message_id)?;
        let message_id = message.wire_id().clone();
        let conversation_id = message.conversation_id.clone();
        Ok(if pinned {
            ClientRequest::PinMessage {
                message_id,
                conversation_id,
            }
        } else {
            ClientRequest::UnpinMessage {
                message_id,
                conversation_id,
            }
        })
    }

    /// Removes the message immediately; a later rejection does not restore it.
    pub fn delete_message(&mut self, message_id: &MessageId) -> SyncResult<ClientRequest> {
        let (wire_id, recipient) = self.addressing(message_id)?;
        annotations::delete(&mut self.messages, &mut self.pins, message_id);
        Ok(ClientRequest::DeleteMessage {
            message_id: wire_id,
            sender_id: self.me.clone(),
            recipient,
        })
    }

    /// Applies fetched history only if the conversation is still the active one.
    pub fn apply_history(
        &mut self,
        conversation_id: &ConversationId,
        history: Vec<MessagePayload>,
    ) -> Effects {
        if self.active.as_ref() != Some(conversation_id) {
            debug!(conversation_id = %conversation_id, "discarding history for inactive conversation");
            return Effects::unchanged();
        }
        self.messages.replace_history(conversation_id, history);
        let mut effects = Effects::changed();
        effects.outbound = self.seen_requests(conversation_id);
        effects
    }

    pub fn apply(&mut self, event: ServerEvent) -> Effects {
        match event {
            ServerEvent::ReceiveMessage(payload) => self.on_receive_message(payload),
            ServerEvent::MessageDelivered {
                message_id,
                delivered_at,
            } => self.on_status(&message_id, MessageStatus::Delivered, delivered_at),
            ServerEvent::MessageSeen {
                message_id,
                seen_at,
            } => self.on_status(&message_id, MessageStatus::Seen, seen_at),
            ServerEvent::MessageReacted {
                message_id,
                reactions,
            } => changed_if(annotations::apply_reactions(
                &mut self.messages,
                &message_id,
                reactions,
            )),
            ServerEvent::UserTyping { from, is_typing } => {
                changed_if(self.presence.set_typing(from, is_typing))
            }
            ServerEvent::StopTyping { from } => changed_if(self.presence.set_typing(from, false)),
            ServerEvent::GroupCreated(payload) => self.on_group_created(payload),
            ServerEvent::UserJoinedGroup {
                conversation_id,
                user_id,
            } => changed_if(
                self.membership_mut(&conversation_id)
                    .is_some_and(|membership| membership.mark_joined(&user_id)),
            ),
            ServerEvent::LeaveGroupResponse {
                conversation_id,
                success,
                message,
            } => {
                if success {
                    changed_if(self.remove_conversation(&conversation_id))
                } else {
                    Effects::notice(
                        NoticeKind::LeaveGroupRejected,
                        RejectionPayload {
                            message: message.unwrap_or_else(|| "could not leave group".into()),
                            conversation_id: Some(conversation_id),
                            message_id: None,
                        },
                    )
                }
            }
            ServerEvent::UserLeftGroup {
                conversation_id,
                user_id,
            } => self.on_users_removed(&conversation_id, vec![user_id]),
            ServerEvent::UsersAddedToGroup {
                conversation_id,
                participants,
                participants_status,
            } => {
                let Some(membership) = self.membership_mut(&conversation_id) else {
                    debug!(conversation_id = %conversation_id, "users added to unknown group");
                    return Effects::unchanged();
                };
                changed_if(membership.merge(&participants, &participants_status) > 0)
            }
            ServerEvent::AddUsersToGroupError(rejection) => {
                Effects::notice(NoticeKind::AddUsersRejected, rejection)
            }
            ServerEvent::UserRemovedFromGroup {
                conversation_id,
                mut participants,
                user_id,
            } => {
                participants.extend(user_id);
                self.on_users_removed(&conversation_id, participants)
            }
            ServerEvent::RemoveUsersFromGroupError(rejection) => {
                Effects::notice(NoticeKind::RemoveUsersRejected, rejection)
            }
            ServerEvent::GroupDeleted { conversation_id } => {
                changed_if(self.remove_conversation(&conversation_id))
            }
            ServerEvent::GroupDeletionError(rejection) => {
                Effects::notice(NoticeKind::GroupDeletionRejected, rejection)
            }
            ServerEvent::MessageEdited {
                message_id,
                new_content,
                edited_at,
            } => changed_if(annotations::apply_edit(
                &mut self.messages,
                &message_id,
                new_content,
                edited_at.unwrap_or_else(Utc::now),
            )),
            ServerEvent::EditErrorMessage(rejection) => {
                Effects::notice(NoticeKind::EditRejected, rejection)
            }
            ServerEvent::MessagePinned {
                message_id,
                conversation_id,
                ..
            } => changed_if(annotations::apply_pin(
                &mut self.messages,
                &mut self.pins,
                &conversation_id,
                &message_id,
                true,
            )),
            ServerEvent::MessageUnpinned {
                message_id,
                conversation_id,
            } => changed_if(annotations::apply_pin(
                &mut self.messages,
                &mut self.pins,
                &conversation_id,
                &message_id,
                false,
            )),
            ServerEvent::MessageDeleted { message_id, .. } => changed_if(
                annotations::delete(&mut self.messages, &mut self.pins, &message_id).is_some(),
            ),
            ServerEvent::LastMessageUpdated {
                conversation_id,
                participants,
                last_message,
            } => {
                let Some(id) = self.resolve_or_create(conversation_id.as_ref(), &participants)
                else {
                    debug!("last message update for unknown conversation");
                    return Effects::unchanged();
                };
                changed_if(self.directory.apply_last_message_update(&id, last_message))
            }
            ServerEvent::UnreadCountUpdate {
                conversation_id,
                user_id,
                unread_count,
            } => {
                let participants: Vec<UserId> = user_id.into_iter().collect();
                let Some(id) = self
                    .directory
                    .resolve(conversation_id.as_ref(), &participants, &self.me)
                else {
                    return Effects::unchanged();
                };
                changed_if(self.directory.set_unread(&id, unread_count))
            }
            ServerEvent::OnlineUsers(snapshot) => {
                let known = self.directory.known_users();
                self.presence.apply_snapshot(snapshot, known.iter());
                Effects::changed()
            }
            ServerEvent::UserOnline { user_id, last_seen } => {
                self.presence.set_online(user_id, true, last_seen);
                Effects::changed()
            }
            ServerEvent::UserOffline { user_id, last_seen } => {
                self.presence.set_online(user_id, false, last_seen);
                Effects::changed()
            }
        }
    }

    fn on_receive_message(&mut self, payload: MessagePayload) -> Effects {
        let Some(conversation_id) = self.conversation_for(&payload) else {
            return Effects::unchanged();
        };
        let from_other = payload.sender_id != self.me;
        let message_id = payload.id.clone();
        let preview = MessagePreview::from(&payload);

        let outcome = self.messages.reconcile_inbound(&conversation_id, payload);
        if outcome == InboundOutcome::Duplicate {
            debug!(message_id = %message_id, "duplicate message ignored");
            return Effects::unchanged();
        }

        self.directory
            .apply_last_message_update(&conversation_id, Some(preview));

        let mut effects = Effects::changed();
        if from_other {
            effects.outbound.push(ClientRequest::MessageDelivered {
                message_id,
                receiver_id: self.me.clone(),
            });
            if self.active.as_ref() == Some(&conversation_id) {
                effects.outbound.extend(self.seen_requests(&conversation_id));
            } else if outcome == InboundOutcome::Appended {
                self.directory.increment_unread(&conversation_id);
            }
        }
        effects
    }

    fn on_status(
        &mut self,
        message_id: &MessageId,
        status: MessageStatus,
        at: Option<DateTime<Utc>>,
    ) -> Effects {
        changed_if(self.messages.apply_status(message_id, status, at))
    }

    fn on_group_created(&mut self, payload: ConversationPayload) -> Effects {
        if let Some(membership) = self.membership_mut(&payload.id) {
            // replayed announcement: merge, never downgrade
            return changed_if(membership.merge(&payload.participants, &payload.participants_status) > 0);
        }
        let mut payload = payload;
        payload.is_group = true;
        let conversation = Conversation::from_payload(payload, &self.me);
        debug!(conversation_id = %conversation.id, "group created");
        self.directory.insert(conversation);
        Effects::changed()
    }

    fn on_users_removed(&mut self, conversation_id: &ConversationId, users: Vec<UserId>) -> Effects {
        let me = self.me.clone();
        let Some(membership) = self.membership_mut(conversation_id) else {
            return Effects::unchanged();
        };
        if users.contains(&me) && !membership.is_creator(&me) {
            return changed_if(self.remove_conversation(conversation_id));
        }
        let mut removed = false;
        for user in &users {
            removed |= membership.remove(user);
        }
        changed_if(removed)
    }

    /// Drops a conversation with all its messages and pins.
    fn remove_conversation(&mut self, conversation_id: &ConversationId) -> bool {
        let existed = self.directory.remove(conversation_id).is_some();
        let purged = self.messages.purge(conversation_id);
        self.pins.purge(conversation_id);
        if self.active.as_ref() == Some(conversation_id) {
            self.active = None;
        }
        debug!(conversation_id = %conversation_id, purged, "conversation removed");
        existed || purged > 0
    }

    /// One `mark_as_seen` per unseen message from someone else, never repeated.
    fn seen_requests(&mut self, conversation_id: &ConversationId) -> Vec<ClientRequest> {
        let me = &self.me;
        let seen_requested = &mut self.seen_requested;
        self.messages
            .messages(conversation_id)
            .iter()
            .filter(|message| &message.sender_id != me && message.status < MessageStatus::Seen)
            .filter(|message| seen_requested.insert(message.wire_id().clone()))
            .map(|message| ClientRequest::MarkAsSeen {
                message_id: message.wire_id().clone(),
                recipient: Recipient::user(message.sender_id.clone()),
            })
            .collect()
    }

    /// Which conversation an inbound message belongs to, creating the direct
    /// conversation on first contact. Messages for groups that are not (or no
    /// longer) in the directory are dropped.
    fn conversation_for(&mut self, payload: &MessagePayload) -> Option<ConversationId> {
        if let Some(group_id) = &payload.group_id {
            if !self.directory.contains(group_id) {
                debug!(conversation_id = %group_id, message_id = %payload.id, "message for unknown group ignored");
                return None;
            }
            return Some(group_id.clone());
        }
        if let Some(id) = payload
            .conversation_id
            .as_ref()
            .filter(|id| self.directory.contains(id))
        {
            return Some(id.clone());
        }
        let counterpart = if payload.sender_id == self.me {
            payload.receiver_id.as_ref()
        } else {
            Some(&payload.sender_id)
        };
        match counterpart {
            Some(user) => Some(self.directory.ensure_direct(user)),
            None => {
                warn!(message_id = %payload.id, "message without counterpart ignored");
                None
            }
        }
    }

    fn resolve_or_create(
        &mut self,
        conversation_id: Option<&ConversationId>,
        participants: &[UserId],
    ) -> Option<ConversationId> {
        if let Some(id) = self.directory.resolve(conversation_id, participants, &self.me) {
            return Some(id);
        }
        if conversation_id.is_some() {
            return None;
        }
        let others: Vec<&UserId> = participants.iter().filter(|user| *user != &self.me).collect();
        match others.as_slice() {
            [counterpart] => Some(self.directory.ensure_direct(counterpart)),
            _ => None,
        }
    }

    fn conversation(&self, conversation_id: &ConversationId) -> SyncResult<&Conversation> {
        self.directory
            .get(conversation_id)
            .ok_or_else(|| SyncError::UnknownConversation(conversation_id.clone()))
    }

    fn group(&self, conversation_id: &ConversationId) -> SyncResult<&Conversation> {
        let conversation = self.conversation(conversation_id)?;
        if !conversation.is_group() {
            return Err(SyncError::NotGroupMember(conversation_id.clone()));
        }
        Ok(conversation)
    }

    fn membership_mut(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Option<&mut GroupMembership> {
        self.directory
            .get_mut(conversation_id)
            .and_then(|conversation| conversation.membership.as_mut())
    }

    fn message(&self, message_id: &MessageId) -> SyncResult<&Message> {
        self.messages
            .find(message_id)
            .ok_or_else(|| SyncError::UnknownMessage(message_id.clone()))
    }

    /// Wire id and recipient for an outbound event about a stored message.
    fn addressing(&self, message_id: &MessageId) -> SyncResult<(MessageId, Recipient)> {
        let message = self.message(message_id)?;
        let recipient = self.conversation(&message.conversation_id)?.recipient();
        Ok((message.wire_id().clone(), recipient))
    }
}

fn changed_if(changed: bool) -> Effects {
    Effects {
        changed,
        ..Effects::default()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
