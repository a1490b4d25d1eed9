//! Group membership: `absent -> pending -> joined`, with a known creator pinned to `joined`.

use std::collections::BTreeMap;

use shared::domain::{MembershipState, MembershipStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    creator: Option<UserId>,
    entries: BTreeMap<UserId, MembershipStatus>,
}

impl GroupMembership {
    /// Seeds membership from a group announcement. Participants the server did
    /// not classify are treated as pending until they join. An announcement
    /// without a creator exempts nobody from removal.
    pub fn from_announcement(
        creator: Option<UserId>,
        participants: &[UserId],
        statuses: &BTreeMap<UserId, MembershipStatus>,
    ) -> Self {
        let mut membership = Self {
            creator: creator.clone(),
            entries: BTreeMap::new(),
        };
        membership.merge(participants, statuses);
        if let Some(creator) = creator {
            membership.entries.insert(creator, MembershipStatus::Joined);
        }
        membership
    }

    pub fn creator(&self) -> Option<&UserId> {
        self.creator.as_ref()
    }

    pub fn is_creator(&self, user_id: &UserId) -> bool {
        self.creator.as_ref() == Some(user_id)
    }

    pub fn state_of(&self, user_id: &UserId) -> MembershipState {
        if self.is_creator(user_id) {
            return MembershipState::Joined;
        }
        self.entries.get(user_id).copied().into()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&UserId, MembershipStatus)> {
        self.entries.iter().map(|(user, status)| (user, *status))
    }

    pub fn participants(&self) -> impl Iterator<Item = &UserId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges added participants without disturbing existing entries.
    /// A participant listed in `participants` but missing from `statuses` is
    /// pending; an entry never moves from `joined` back to `pending`.
    pub fn merge(
        &mut self,
        participants: &[UserId],
        statuses: &BTreeMap<UserId, MembershipStatus>,
    ) -> usize {
        let incoming = participants
            .iter()
            .map(|user| {
                let status = statuses
                    .get(user)
                    .copied()
                    .unwrap_or(MembershipStatus::Pending);
                (user.clone(), status)
            })
            .chain(statuses.iter().map(|(user, status)| (user.clone(), *status)));

        let mut changed = 0;
        for (user, status) in incoming {
            let current = self.entries.get(&user).copied();
            if current.map_or(true, |current| status > current) {
                self.entries.insert(user, status);
                changed += 1;
            }
        }
        changed
    }

    /// `pending -> joined`. An absent user joining is recorded as joined too,
    /// since the server is authoritative on who is in the group.
    pub fn mark_joined(&mut self, user_id: &UserId) -> bool {
        match self.entries.get(user_id) {
            Some(MembershipStatus::Joined) => false,
            _ => {
                self.entries.insert(user_id.clone(), MembershipStatus::Joined);
                true
            }
        }
    }

    /// Drops a participant's entry entirely. The creator cannot be removed.
    pub fn remove(&mut self, user_id: &UserId) -> bool {
        if self.is_creator(user_id) {
            return false;
        }
        self.entries.remove(user_id).is_some()
    }
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
