//! Per-conversation message sequences with optimistic insertion and
//! rank-based status reconciliation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, MessageKind, MessageStatus, UserId},
    protocol::{MessagePayload, ReactionSet},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Stable local key: the client id for optimistic sends, the server id otherwise.
    pub id: MessageId,
    pub client_id: Option<MessageId>,
    pub server_id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub seen_at: Option<DateTime<Utc>>,
    pub reactions: ReactionSet,
    pub pinned: bool,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply_to: Option<MessageId>,
}

impl Message {
    pub fn matches(&self, id: &MessageId) -> bool {
        &self.id == id || self.client_id.as_ref() == Some(id) || self.server_id.as_ref() == Some(id)
    }

    /// Still waiting for the server to acknowledge it.
    pub fn is_tentative(&self) -> bool {
        self.server_id.is_none()
    }

    /// Id to put on outbound events about this message; the server id once known.
    pub fn wire_id(&self) -> &MessageId {
        self.server_id.as_ref().unwrap_or(&self.id)
    }

    pub fn from_payload(conversation_id: ConversationId, payload: MessagePayload) -> Self {
        Self {
            id: payload.id.clone(),
            client_id: payload.client_id,
            server_id: Some(payload.id),
            conversation_id,
            sender_id: payload.sender_id,
            content: payload.content,
            kind: payload.kind,
            status: payload.status.unwrap_or(MessageStatus::Sent),
            created_at: payload.timestamp,
            delivered_at: payload.delivered_at,
            seen_at: payload.seen_at,
            reactions: payload.reactions,
            pinned: payload.pinned,
            edited: payload.edited,
            edited_at: payload.edited_at,
            reply_to: payload.reply_to_message_id,
        }
    }
}

/// Input for an optimistic send.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Appended,
    /// A tentative entry with the same client id was merged with the server copy.
    Promoted,
    Duplicate,
}

/// Consecutive messages by one sender, the unit the presentation layer groups on.
#[derive(Debug, PartialEq)]
pub struct MessageRun<'a> {
    pub sender_id: &'a UserId,
    pub messages: Vec<&'a Message>,
}

/// Upper bound on receipts held for messages that have not arrived yet.
const PENDING_RECEIPT_LIMIT: usize = 512;

/// Delivery receipts that named a message before it was stored, typically the
/// server id of a send whose echo is still in flight.
#[derive(Debug, Default, Clone)]
struct PendingReceipt {
    status: MessageStatus,
    delivered_at: Option<DateTime<Utc>>,
    seen_at: Option<DateTime<Utc>>,
}

impl PendingReceipt {
    fn record(&mut self, status: MessageStatus, at: Option<DateTime<Utc>>) {
        match status {
            MessageStatus::Delivered => self.delivered_at = at.or(self.delivered_at),
            MessageStatus::Seen => self.seen_at = at.or(self.seen_at),
            MessageStatus::Sending | MessageStatus::Sent => {}
        }
        self.status = self.status.max(status);
    }

    fn settle(self, message: &mut Message) {
        if message.status.advances_to(self.status) {
            message.status = self.status;
        }
        message.delivered_at = message.delivered_at.or(self.delivered_at);
        message.seen_at = message.seen_at.or(self.seen_at);
    }
}

#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    conversations: HashMap<ConversationId, Vec<Message>>,
    pending_receipts: HashMap<MessageId, PendingReceipt>,
}

impl MessageStore {
    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.conversations
            .values()
            .flat_map(|messages| messages.iter())
            .find(|message| message.matches(id))
    }

    pub fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.conversations
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|message| message.matches(id))
    }

    /// Inserts a message in `sending` state under a fresh client id and returns that id.
    pub fn send_optimistic(
        &mut self,
        outgoing: OutgoingMessage,
        client_id: MessageId,
        now: DateTime<Utc>,
    ) -> MessageId {
        let message = Message {
            id: client_id.clone(),
            client_id: Some(client_id.clone()),
            server_id: None,
            conversation_id: outgoing.conversation_id.clone(),
            sender_id: outgoing.sender_id,
            content: outgoing.content,
            kind: outgoing.kind,
            status: MessageStatus::Sending,
            created_at: now,
            delivered_at: None,
            seen_at: None,
            reactions: ReactionSet::default(),
            pinned: false,
            edited: false,
            edited_at: None,
            reply_to: outgoing.reply_to,
        };
        self.conversations
            .entry(outgoing.conversation_id)
            .or_default()
            .push(message);
        client_id
    }

    /// Merges a server-originated message into its conversation.
    pub fn reconcile_inbound(
        &mut self,
        conversation_id: &ConversationId,
        payload: MessagePayload,
    ) -> InboundOutcome {
        let messages = self.conversations.entry(conversation_id.clone()).or_default();

        if messages.iter().any(|message| message.matches(&payload.id)) {
            return InboundOutcome::Duplicate;
        }
        let receipt = self.pending_receipts.remove(&payload.id);

        let tentative = payload.client_id.as_ref().and_then(|client_id| {
            messages
                .iter_mut()
                .find(|message| message.is_tentative() && message.matches(client_id))
        });
        if let Some(message) = tentative {
            promote(message, payload);
            if let Some(receipt) = receipt {
                receipt.settle(message);
            }
            return InboundOutcome::Promoted;
        }

        let mut message = Message::from_payload(conversation_id.clone(), payload);
        if let Some(receipt) = receipt {
            receipt.settle(&mut message);
        }
        messages.push(message);
        InboundOutcome::Appended
    }

    /// Advances a message's status; lower or equal ranks are discarded. A
    /// receipt for a message not stored yet is held until it arrives.
    pub fn apply_status(
        &mut self,
        id: &MessageId,
        status: MessageStatus,
        at: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(message) = self.find_mut(id) else {
            self.hold_receipt(id, status, at);
            return false;
        };
        if !message.status.advances_to(status) {
            return false;
        }
        message.status = status;
        match status {
            MessageStatus::Delivered => message.delivered_at = at.or(message.delivered_at),
            MessageStatus::Seen => message.seen_at = at.or(message.seen_at),
            MessageStatus::Sending | MessageStatus::Sent => {}
        }
        true
    }

    fn hold_receipt(&mut self, id: &MessageId, status: MessageStatus, at: Option<DateTime<Utc>>) {
        if !self.pending_receipts.contains_key(id)
            && self.pending_receipts.len() >= PENDING_RECEIPT_LIMIT
        {
            return;
        }
        self.pending_receipts
            .entry(id.clone())
            .or_default()
            .record(status, at);
    }

    /// Deletes a message unconditionally; nothing is kept to restore it.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        for messages in self.conversations.values_mut() {
            if let Some(index) = messages.iter().position(|message| message.matches(id)) {
                return Some(messages.remove(index));
            }
        }
        None
    }

    /// Drops every message held for a conversation.
    pub fn purge(&mut self, conversation_id: &ConversationId) -> usize {
        self.conversations
            .remove(conversation_id)
            .map(|messages| messages.len())
            .unwrap_or(0)
    }

    /// Replaces a conversation's sequence with fetched history. Unacknowledged
    /// sends and live messages newer than the history are kept at the tail.
    pub fn replace_history(&mut self, conversation_id: &ConversationId, history: Vec<MessagePayload>) {
        let previous = self.conversations.remove(conversation_id).unwrap_or_default();
        let mut messages: Vec<Message> = Vec::with_capacity(history.len());
        for payload in history {
            if messages.iter().any(|message| message.matches(&payload.id)) {
                continue;
            }
            let receipt = self.pending_receipts.remove(&payload.id);
            let mut message = Message::from_payload(conversation_id.clone(), payload);
            if let Some(receipt) = receipt {
                receipt.settle(&mut message);
            }
            messages.push(message);
        }
        let newest = messages.iter().map(|message| message.created_at).max();

        for kept in previous {
            if let Some(server_id) = kept.server_id.clone() {
                let live = newest.map_or(true, |newest| kept.created_at > newest);
                if live && !messages.iter().any(|message| message.matches(&server_id)) {
                    messages.push(kept);
                }
                continue;
            }
            let acknowledged = kept.client_id.as_ref().and_then(|client_id| {
                messages
                    .iter_mut()
                    .find(|message| message.client_id.as_ref() == Some(client_id))
            });
            match acknowledged {
                Some(message) => message.id = kept.id,
                None => messages.push(kept),
            }
        }

        self.conversations.insert(conversation_id.clone(), messages);
    }

    /// Derived grouping of adjacent messages by sender; never stored.
    pub fn runs(&self, conversation_id: &ConversationId) -> Vec<MessageRun<'_>> {
        let mut runs: Vec<MessageRun<'_>> = Vec::new();
        for message in self.messages(conversation_id) {
            match runs.last_mut() {
                Some(run) if run.sender_id == &message.sender_id => run.messages.push(message),
                _ => runs.push(MessageRun {
                    sender_id: &message.sender_id,
                    messages: vec![message],
                }),
            }
        }
        runs
    }
}

fn promote(message: &mut Message, payload: MessagePayload) {
    let status = payload
        .status
        .unwrap_or(MessageStatus::Sent)
        .max(MessageStatus::Sent);
    if message.status.advances_to(status) {
        message.status = status;
    }
    message.server_id = Some(payload.id);
    message.content = payload.content;
    message.kind = payload.kind;
    message.created_at = payload.timestamp;
    message.delivered_at = payload.delivered_at.or(message.delivered_at);
    message.seen_at = payload.seen_at.or(message.seen_at);
    if payload.reply_to_message_id.is_some() {
        message.reply_to = payload.reply_to_message_id;
    }
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
