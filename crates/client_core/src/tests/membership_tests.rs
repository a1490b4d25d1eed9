use super::*;

fn user(id: &str) -> UserId {
    UserId::from(id)
}

fn group() -> GroupMembership {
    let statuses = BTreeMap::from([
        (user("alice"), MembershipStatus::Joined),
        (user("bob"), MembershipStatus::Pending),
    ]);
    GroupMembership::from_announcement(
        Some(user("owner")),
        &[user("alice"), user("bob")],
        &statuses,
    )
}

#[test]
fn announcement_classifies_participants_and_joins_creator() {
    let membership = group();
    assert_eq!(membership.state_of(&user("owner")), MembershipState::Joined);
    assert_eq!(membership.state_of(&user("alice")), MembershipState::Joined);
    assert_eq!(membership.state_of(&user("bob")), MembershipState::Pending);
    assert_eq!(membership.state_of(&user("carol")), MembershipState::Absent);
    assert_eq!(membership.len(), 3);
}

#[test]
fn adding_an_already_joined_user_changes_nothing() {
    let mut membership = group();
    let before = membership.clone();

    let statuses = BTreeMap::from([(user("alice"), MembershipStatus::Pending)]);
    assert_eq!(membership.merge(&[user("alice")], &statuses), 0);
    assert_eq!(membership, before);
    assert_eq!(membership.state_of(&user("alice")), MembershipState::Joined);
}

#[test]
fn merge_adds_new_users_as_pending_by_default() {
    let mut membership = group();
    assert_eq!(membership.merge(&[user("carol")], &BTreeMap::new()), 1);
    assert_eq!(membership.state_of(&user("carol")), MembershipState::Pending);
    assert_eq!(membership.state_of(&user("bob")), MembershipState::Pending);
}

#[test]
fn self_join_moves_pending_to_joined_once() {
    let mut membership = group();
    assert!(membership.mark_joined(&user("bob")));
    assert!(!membership.mark_joined(&user("bob")));
    assert_eq!(membership.state_of(&user("bob")), MembershipState::Joined);
}

#[test]
fn removal_deletes_entry_but_spares_creator() {
    let mut membership = group();
    assert!(membership.remove(&user("bob")));
    assert!(!membership.remove(&user("bob")));
    assert_eq!(membership.state_of(&user("bob")), MembershipState::Absent);

    assert!(!membership.remove(&user("owner")));
    assert_eq!(membership.state_of(&user("owner")), MembershipState::Joined);
}

#[test]
fn each_user_has_exactly_one_entry() {
    let mut membership = group();
    membership.merge(
        &[user("bob"), user("bob"), user("dave")],
        &BTreeMap::from([(user("dave"), MembershipStatus::Joined)]),
    );
    let mut seen: Vec<_> = membership.participants().cloned().collect();
    let total = seen.len();
    seen.dedup();
    assert_eq!(seen.len(), total);
    assert_eq!(membership.state_of(&user("dave")), MembershipState::Joined);
}

#[test]
fn announcement_without_creator_exempts_nobody() {
    let mut membership = GroupMembership::from_announcement(
        None,
        &[user("me"), user("bob")],
        &BTreeMap::from([(user("bob"), MembershipStatus::Joined)]),
    );
    assert_eq!(membership.creator(), None);
    assert_eq!(membership.state_of(&user("me")), MembershipState::Pending);
    assert!(membership.remove(&user("me")));
    assert_eq!(membership.state_of(&user("me")), MembershipState::Absent);
}
