use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    ConversationId, MembershipStatus, MessageId, MessageKind, MessageStatus, UserId,
};

/// Who an outbound event is addressed to: a direct counterpart or a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<ConversationId>,
}

impl Recipient {
    pub fn user(user_id: UserId) -> Self {
        Self {
            receiver_id: Some(user_id),
            group_id: None,
        }
    }

    pub fn group(group_id: ConversationId) -> Self {
        Self {
            receiver_id: None,
            group_id: Some(group_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    JoinRoom(UserId),
    SendMessage {
        client_id: MessageId,
        sender_id: UserId,
        #[serde(flatten)]
        recipient: Recipient,
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_message_id: Option<MessageId>,
    },
    MessageDelivered {
        message_id: MessageId,
        receiver_id: UserId,
    },
    MarkAsSeen {
        message_id: MessageId,
        #[serde(flatten)]
        recipient: Recipient,
    },
    ReactToMessage {
        message_id: MessageId,
        #[serde(flatten)]
        recipient: Recipient,
        reaction: String,
    },
    RemoveReaction {
        message_id: MessageId,
        #[serde(flatten)]
        recipient: Recipient,
    },
    Typing {
        #[serde(flatten)]
        recipient: Recipient,
        is_typing: bool,
    },
    StopTyping {
        #[serde(flatten)]
        recipient: Recipient,
    },
    CreateGroup {
        group_name: String,
        participants: Vec<UserId>,
    },
    JoinGroup {
        group_id: ConversationId,
    },
    LeaveGroup {
        conversation_id: ConversationId,
    },
    AddUsersToGroup {
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    },
    RemoveUsersFromGroup {
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    },
    DeleteGroup {
        conversation_id: ConversationId,
    },
    EditMessage {
        message_id: MessageId,
        new_content: String,
        editor_id: UserId,
    },
    PinMessage {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    UnpinMessage {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    DeleteMessage {
        message_id: MessageId,
        sender_id: UserId,
        #[serde(flatten)]
        recipient: Recipient,
    },
    OpenChat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_user_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },
    ResetUnreadCount {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },
}

impl ClientRequest {
    /// Wire name of the event, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join_room",
            Self::SendMessage { .. } => "send_message",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::MarkAsSeen { .. } => "mark_as_seen",
            Self::ReactToMessage { .. } => "react_to_message",
            Self::RemoveReaction { .. } => "remove_reaction",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::CreateGroup { .. } => "create_group",
            Self::JoinGroup { .. } => "join_group",
            Self::LeaveGroup { .. } => "leave_group",
            Self::AddUsersToGroup { .. } => "add_users_to_group",
            Self::RemoveUsersFromGroup { .. } => "remove_users_from_group",
            Self::DeleteGroup { .. } => "delete_group",
            Self::EditMessage { .. } => "edit_message",
            Self::PinMessage { .. } => "pin_message",
            Self::UnpinMessage { .. } => "unpin_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::OpenChat { .. } => "open_chat",
            Self::ResetUnreadCount { .. } => "reset_unread_count",
        }
    }
}

/// Reactions on one message: at most one emoji per user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReactionSet(BTreeMap<UserId, String>);

impl ReactionSet {
    pub fn get(&self, user_id: &UserId) -> Option<&str> {
        self.0.get(user_id).map(String::as_str)
    }

    pub fn set(&mut self, user_id: UserId, reaction: impl Into<String>) {
        self.0.insert(user_id, reaction.into());
    }

    pub fn remove(&mut self, user_id: &UserId) -> bool {
        self.0.remove(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &str)> {
        self.0.iter().map(|(user, reaction)| (user, reaction.as_str()))
    }
}

impl FromIterator<(UserId, String)> for ReactionSet {
    fn from_iter<T: IntoIterator<Item = (UserId, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionEntry {
    user_id: UserId,
    #[serde(alias = "emoji")]
    reaction: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReactionsWire {
    Map(BTreeMap<UserId, String>),
    List(Vec<ReactionEntry>),
}

impl<'de> Deserialize<'de> for ReactionSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let reactions = match Option::<ReactionsWire>::deserialize(deserializer)? {
            None => BTreeMap::new(),
            Some(ReactionsWire::Map(map)) => map,
            // Later entries for the same user replace earlier ones.
            Some(ReactionsWire::List(list)) => list
                .into_iter()
                .map(|entry| (entry.user_id, entry.reaction))
                .collect(),
        };
        Ok(Self(reactions))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(alias = "_id")]
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<MessageId>,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: ReactionSet,
    #[serde(default, alias = "isPinned")]
    pub pinned: bool,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
}

impl From<&MessagePayload> for MessagePreview {
    fn from(message: &MessagePayload) -> Self {
        Self {
            content: message.content.clone(),
            sender_id: Some(message.sender_id.clone()),
            sender_name: None,
            timestamp: Some(message.timestamp),
            kind: Some(message.kind),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PreviewWire {
    Text(String),
    Preview(MessagePreview),
}

/// Directory entries carry the last message either as bare text or as a preview object.
fn preview_from_wire<'de, D>(deserializer: D) -> Result<Option<MessagePreview>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<PreviewWire>::deserialize(deserializer)? {
        None => None,
        Some(PreviewWire::Text(content)) if content.is_empty() => None,
        Some(PreviewWire::Text(content)) => Some(MessagePreview {
            content,
            ..MessagePreview::default()
        }),
        Some(PreviewWire::Preview(preview)) => Some(preview),
    })
}

/// One conversation as returned by the directory API or announced by `group_created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    #[serde(alias = "_id")]
    pub id: ConversationId,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default, alias = "groupName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub participants_status: BTreeMap<UserId, MembershipStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    #[serde(
        default,
        deserialize_with = "preview_from_wire",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, alias = "online", skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
    #[serde(default, alias = "online")]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Body of the `*_error` events the server uses to reject an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionPayload {
    #[serde(alias = "error")]
    pub message: String,
    #[serde(default, alias = "groupId", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ReceiveMessage(MessagePayload),
    MessageDelivered {
        message_id: MessageId,
        #[serde(default)]
        delivered_at: Option<DateTime<Utc>>,
    },
    MessageSeen {
        message_id: MessageId,
        #[serde(default)]
        seen_at: Option<DateTime<Utc>>,
    },
    MessageReacted {
        message_id: MessageId,
        #[serde(default)]
        reactions: ReactionSet,
    },
    UserTyping {
        from: UserId,
        #[serde(default = "default_true")]
        is_typing: bool,
    },
    StopTyping {
        from: UserId,
    },
    GroupCreated(ConversationPayload),
    UserJoinedGroup {
        #[serde(alias = "groupId")]
        conversation_id: ConversationId,
        user_id: UserId,
    },
    LeaveGroupResponse {
        #[serde(alias = "groupId")]
        conversation_id: ConversationId,
        #[serde(default = "default_true")]
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },
    UserLeftGroup {
        #[serde(alias = "groupId")]
        conversation_id: ConversationId,
        user_id: UserId,
    },
    UsersAddedToGroup {
        #[serde(alias = "groupId")]
        conversation_id: ConversationId,
        #[serde(default)]
        participants: Vec<UserId>,
        #[serde(default)]
        participants_status: BTreeMap<UserId, MembershipStatus>,
    },
    AddUsersToGroupError(RejectionPayload),
    UserRemovedFromGroup {
        #[serde(alias = "groupId")]
        conversation_id: ConversationId,
        #[serde(default)]
        participants: Vec<UserId>,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    RemoveUsersFromGroupError(RejectionPayload),
    GroupDeleted {
        #[serde(alias = "groupId")]
        conversation_id: ConversationId,
    },
    GroupDeletionError(RejectionPayload),
    MessageEdited {
        #[serde(alias = "_id")]
        message_id: MessageId,
        #[serde(alias = "content")]
        new_content: String,
        #[serde(default)]
        edited_at: Option<DateTime<Utc>>,
    },
    EditErrorMessage(RejectionPayload),
    MessagePinned {
        message_id: MessageId,
        conversation_id: ConversationId,
        #[serde(default)]
        message: Option<MessagePayload>,
    },
    MessageUnpinned {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    MessageDeleted {
        message_id: MessageId,
        #[serde(default)]
        conversation_id: Option<ConversationId>,
    },
    LastMessageUpdated {
        #[serde(default)]
        conversation_id: Option<ConversationId>,
        #[serde(default)]
        participants: Vec<UserId>,
        #[serde(default)]
        last_message: Option<MessagePreview>,
    },
    UnreadCountUpdate {
        #[serde(default)]
        conversation_id: Option<ConversationId>,
        #[serde(default)]
        user_id: Option<UserId>,
        unread_count: u32,
    },
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<PresencePayload>),
    #[serde(rename = "userOnline")]
    UserOnline {
        user_id: UserId,
        #[serde(default)]
        last_seen: Option<DateTime<Utc>>,
    },
    #[serde(rename = "userOffline")]
    UserOffline {
        user_id: UserId,
        #[serde(default)]
        last_seen: Option<DateTime<Utc>>,
    },
}

fn default_true() -> bool {
    true
}

impl ServerEvent {
    /// Every inbound event name this client understands.
    pub const NAMES: [&'static str; 26] = [
        "receive_message",
        "message_delivered",
        "message_seen",
        "message_reacted",
        "user_typing",
        "stop_typing",
        "group_created",
        "user_joined_group",
        "leave_group_response",
        "user_left_group",
        "users_added_to_group",
        "add_users_to_group_error",
        "user_removed_from_group",
        "remove_users_from_group_error",
        "group_deleted",
        "group_deletion_error",
        "message_edited",
        "edit_error_message",
        "message_pinned",
        "message_unpinned",
        "message_deleted",
        "last_message_updated",
        "unread_count_update",
        "getOnlineUsers",
        "userOnline",
        "userOffline",
    ];

    pub fn is_known(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }

    /// Wire name of the event, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::MessageSeen { .. } => "message_seen",
            Self::MessageReacted { .. } => "message_reacted",
            Self::UserTyping { .. } => "user_typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::GroupCreated(_) => "group_created",
            Self::UserJoinedGroup { .. } => "user_joined_group",
            Self::LeaveGroupResponse { .. } => "leave_group_response",
            Self::UserLeftGroup { .. } => "user_left_group",
            Self::UsersAddedToGroup { .. } => "users_added_to_group",
            Self::AddUsersToGroupError(_) => "add_users_to_group_error",
            Self::UserRemovedFromGroup { .. } => "user_removed_from_group",
            Self::RemoveUsersFromGroupError(_) => "remove_users_from_group_error",
            Self::GroupDeleted { .. } => "group_deleted",
            Self::GroupDeletionError(_) => "group_deletion_error",
            Self::MessageEdited { .. } => "message_edited",
            Self::EditErrorMessage(_) => "edit_error_message",
            Self::MessagePinned { .. } => "message_pinned",
            Self::MessageUnpinned { .. } => "message_unpinned",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::LastMessageUpdated { .. } => "last_message_updated",
            Self::UnreadCountUpdate { .. } => "unread_count_update",
            Self::OnlineUsers(_) => "getOnlineUsers",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
        }
    }
}

/// Envelope used to peek at an inbound frame's event name before decoding it.
#[derive(Debug, Deserialize)]
pub struct FrameHeader {
    pub event: String,
}
