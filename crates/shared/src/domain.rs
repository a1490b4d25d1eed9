use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);
id_newtype!(MessageId);

impl From<&UserId> for ConversationId {
    /// Direct conversations with no server-issued id are keyed by the counterpart.
    fn from(value: &UserId) -> Self {
        Self(value.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Emoji,
    Audio,
    Video,
}

/// Delivery state of a message. Variants are declared in rank order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Sending,
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn rank(self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Seen => 3,
        }
    }

    /// True when moving from `self` to `next` would not regress the message.
    pub fn advances_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

/// Stored membership of a group participant. Absence is modelled by the
/// participant not having an entry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Pending,
    Joined,
}

/// Membership as observed from the outside, including absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Absent,
    Pending,
    Joined,
}

impl From<Option<MembershipStatus>> for MembershipState {
    fn from(value: Option<MembershipStatus>) -> Self {
        match value {
            None => Self::Absent,
            Some(MembershipStatus::Pending) => Self::Pending,
            Some(MembershipStatus::Joined) => Self::Joined,
        }
    }
}
