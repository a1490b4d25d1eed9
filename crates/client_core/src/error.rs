use shared::{
    domain::{ConversationId, MessageId},
    error::ApiException,
};
use thiserror::Error;

/// Failures surfaced by the synchronization engine.
///
/// Precondition variants are raised before anything reaches the network.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("no session identity; the channel cannot be opened")]
    MissingIdentity,
    #[error("channel is not connected")]
    NotConnected,
    #[error("no conversation is active")]
    NoActiveConversation,
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),
    #[error("conversation {0} is not a group the current user belongs to")]
    NotGroupMember(ConversationId),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(#[from] ApiException),
    #[error("sync engine has shut down")]
    EngineStopped,
}

impl SyncError {
    /// Local precondition failures never reach the network and need no retry.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::EmptyContent
                | Self::MissingIdentity
                | Self::NotConnected
                | Self::NoActiveConversation
                | Self::UnknownConversation(_)
                | Self::UnknownMessage(_)
                | Self::NotGroupMember(_)
        )
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    EditRejected,
    GroupDeletionRejected,
    AddUsersRejected,
    RemoveUsersRejected,
    LeaveGroupRejected,
}

/// A business rejection from the server, shown to the user once and not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub conversation_id: Option<ConversationId>,
    pub message_id: Option<MessageId>,
}
