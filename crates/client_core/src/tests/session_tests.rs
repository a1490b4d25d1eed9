use super::*;

use chrono::TimeZone;
use serde_json::json;
use shared::domain::MembershipState;

fn me() -> UserId {
    UserId::from("me")
}

fn event(value: serde_json::Value) -> ServerEvent {
    serde_json::from_value(value).expect("valid server event")
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn incoming(id: &str, from: &str) -> ServerEvent {
    event(json!({
        "event": "receive_message",
        "data": {
            "_id": id,
            "senderId": from,
            "receiverId": "me",
            "content": format!("hello from {from}"),
            "createdAt": "2024-05-01T10:00:00Z"
        }
    }))
}

fn group_created(id: &str) -> ServerEvent {
    event(json!({
        "event": "group_created",
        "data": {
            "_id": id,
            "groupName": "team",
            "createdBy": "me",
            "participants": ["me", "bob", "carol"],
            "participantsStatus": { "bob": "joined", "carol": "pending" }
        }
    }))
}

fn session_with_bob() -> SessionState {
    let mut session = SessionState::new(me());
    session.upsert_directory(vec![serde_json::from_value(json!({
        "_id": "bob",
        "name": "Bob",
        "lastMessage": "earlier"
    }))
    .unwrap()]);
    session
}

#[test]
fn inbound_message_from_stranger_creates_direct_conversation() {
    let mut session = SessionState::new(me());
    let effects = session.apply(incoming("m-1", "dave"));

    assert!(effects.changed);
    let conversation_id = ConversationId::from("dave");
    let conversation = session.directory().get(&conversation_id).expect("direct conversation");
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(
        conversation.last_message.as_ref().map(|preview| preview.content.as_str()),
        Some("hello from dave")
    );
    assert_eq!(
        effects.outbound,
        vec![ClientRequest::MessageDelivered {
            message_id: MessageId::from("m-1"),
            receiver_id: me(),
        }]
    );
}

#[test]
fn replayed_message_is_applied_once() {
    let mut session = session_with_bob();
    let _ = session.apply(incoming("m-1", "bob"));
    let effects = session.apply(incoming("m-1", "bob"));

    assert!(!effects.changed);
    assert!(effects.outbound.is_empty());
    assert_eq!(session.messages().messages(&ConversationId::from("bob")).len(), 1);
    assert_eq!(
        session.directory().get(&ConversationId::from("bob")).unwrap().unread_count,
        1
    );
}

#[test]
fn selecting_clears_unread_and_marks_loaded_messages_seen_once() {
    let mut session = session_with_bob();
    let bob = ConversationId::from("bob");
    let _ = session.apply(incoming("m-1", "bob"));

    let effects = session.select_conversation(&bob).unwrap();
    assert_eq!(session.directory().get(&bob).unwrap().unread_count, 0);
    assert_eq!(session.active(), Some(&bob));
    assert_eq!(
        effects.outbound,
        vec![
            ClientRequest::OpenChat {
                selected_user_id: Some(UserId::from("bob")),
                conversation_id: None,
            },
            ClientRequest::ResetUnreadCount {
                user_id: Some(UserId::from("bob")),
                conversation_id: None,
            },
            ClientRequest::MarkAsSeen {
                message_id: MessageId::from("m-1"),
                recipient: Recipient::user(UserId::from("bob")),
            },
        ]
    );

    let again = session.select_conversation(&bob).unwrap();
    assert_eq!(again.outbound.len(), 2);

    let live = session.apply(incoming("m-2", "bob"));
    assert_eq!(session.directory().get(&bob).unwrap().unread_count, 0);
    assert!(live.outbound.contains(&ClientRequest::MarkAsSeen {
        message_id: MessageId::from("m-2"),
        recipient: Recipient::user(UserId::from("bob")),
    }));
}

#[test]
fn selecting_unknown_conversation_fails() {
    let mut session = SessionState::new(me());
    let err = session
        .select_conversation(&ConversationId::from("ghost"))
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownConversation(_)));
}

#[test]
fn send_requires_content_and_active_conversation() {
    let mut session = session_with_bob();
    let err = session
        .send_message("hi", MessageKind::Text, None, MessageId::from("c-1"), now())
        .unwrap_err();
    assert!(matches!(err, SyncError::NoActiveConversation));

    let _ = session.select_conversation(&ConversationId::from("bob")).unwrap();
    let err = session
        .send_message("   ", MessageKind::Text, None, MessageId::from("c-1"), now())
        .unwrap_err();
    assert!(matches!(err, SyncError::EmptyContent));
    assert!(session.messages().messages(&ConversationId::from("bob")).is_empty());
}

#[test]
fn out_of_order_receipts_end_at_seen() {
    let mut session = session_with_bob();
    let bob = ConversationId::from("bob");
    let _ = session.select_conversation(&bob).unwrap();
    let (client_id, request) = session
        .send_message("hi", MessageKind::Text, None, MessageId::from("c-1"), now())
        .unwrap();
    assert!(matches!(
        request,
        ClientRequest::SendMessage { ref recipient, .. } if recipient == &Recipient::user(UserId::from("bob"))
    ));

    let _ = session.apply(event(json!({
        "event": "message_delivered", "data": { "messageId": "c-1" }
    })));
    let _ = session.apply(event(json!({
        "event": "message_seen", "data": { "messageId": "c-1" }
    })));
    let _ = session.apply(event(json!({
        "event": "receive_message",
        "data": {
            "_id": "m-77",
            "clientId": "c-1",
            "senderId": "me",
            "receiverId": "bob",
            "content": "hi",
            "status": "sent",
            "createdAt": "2024-05-01T10:00:01Z"
        }
    })));
    let late = session.apply(event(json!({
        "event": "message_delivered", "data": { "messageId": "m-77" }
    })));

    assert!(!late.changed);
    let messages = session.messages().messages(&bob);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, client_id);
    assert_eq!(messages[0].server_id, Some(MessageId::from("m-77")));
    assert_eq!(messages[0].status, MessageStatus::Seen);
}

#[test]
fn group_deleted_while_open_clears_everything() {
    let mut session = SessionState::new(me());
    let group = ConversationId::from("g1");
    let _ = session.apply(group_created("g1"));
    let _ = session.select_conversation(&group).unwrap();
    let _ = session.apply(event(json!({
        "event": "receive_message",
        "data": {
            "_id": "m-1", "senderId": "bob", "groupId": "g1",
            "content": "hey all", "createdAt": "2024-05-01T10:00:00Z"
        }
    })));
    assert_eq!(session.messages().messages(&group).len(), 1);

    let effects = session.apply(event(json!({
        "event": "group_deleted", "data": { "conversationId": "g1" }
    })));

    assert!(effects.changed);
    assert!(session.directory().get(&group).is_none());
    assert!(session.messages().messages(&group).is_empty());
    assert_eq!(session.active(), None);
}

#[test]
fn adding_an_already_joined_user_changes_nothing() {
    let mut session = SessionState::new(me());
    let group = ConversationId::from("g1");
    let _ = session.apply(group_created("g1"));

    let effects = session.apply(event(json!({
        "event": "users_added_to_group",
        "data": {
            "conversationId": "g1",
            "participants": ["bob"],
            "participantsStatus": { "bob": "pending" }
        }
    })));
    assert!(!effects.changed);

    let membership = session.directory().get(&group).unwrap().membership.as_ref().unwrap();
    assert_eq!(membership.state_of(&UserId::from("bob")), MembershipState::Joined);
    assert_eq!(membership.len(), 3);
}

#[test]
fn self_join_and_removal_follow_membership_rules() {
    let mut session = SessionState::new(me());
    let group = ConversationId::from("g1");
    let _ = session.apply(group_created("g1"));

    let _ = session.apply(event(json!({
        "event": "user_joined_group",
        "data": { "groupId": "g1", "userId": "carol" }
    })));
    let _ = session.apply(event(json!({
        "event": "user_removed_from_group",
        "data": { "conversationId": "g1", "participants": ["bob", "me"] }
    })));

    let membership = session.directory().get(&group).unwrap().membership.as_ref().unwrap();
    assert_eq!(membership.state_of(&UserId::from("carol")), MembershipState::Joined);
    assert_eq!(membership.state_of(&UserId::from("bob")), MembershipState::Absent);
    assert_eq!(membership.state_of(&me()), MembershipState::Joined);
}

#[test]
fn removal_of_local_member_purges_group() {
    let mut session = SessionState::new(me());
    let group = ConversationId::from("g2");
    let _ = session.apply(event(json!({
        "event": "group_created",
        "data": {
            "_id": "g2", "groupName": "other", "createdBy": "bob",
            "participants": ["bob", "me"],
            "participantsStatus": { "me": "joined" }
        }
    })));
    let _ = session.apply(event(json!({
        "event": "receive_message",
        "data": {
            "_id": "m-1", "senderId": "bob", "groupId": "g2",
            "content": "bye", "createdAt": "2024-05-01T10:00:00Z"
        }
    })));

    let _ = session.apply(event(json!({
        "event": "user_left_group",
        "data": { "conversationId": "g2", "userId": "me" }
    })));

    assert!(!session.directory().contains(&group));
    assert!(session.messages().messages(&group).is_empty());
}

#[test]
fn rejections_surface_as_notices() {
    let mut session = SessionState::new(me());
    let effects = session.apply(event(json!({
        "event": "group_deletion_error",
        "data": { "message": "only the creator can delete", "groupId": "g1" }
    })));
    assert!(!effects.changed);
    assert_eq!(effects.notices.len(), 1);
    assert_eq!(effects.notices[0].kind, NoticeKind::GroupDeletionRejected);
    assert_eq!(effects.notices[0].conversation_id, Some(ConversationId::from("g1")));

    let effects = session.apply(event(json!({
        "event": "leave_group_response",
        "data": { "conversationId": "g1", "success": false, "message": "nope" }
    })));
    assert_eq!(effects.notices[0].kind, NoticeKind::LeaveGroupRejected);
    assert_eq!(effects.notices[0].message, "nope");
}

#[test]
fn stale_history_is_discarded() {
    let mut session = session_with_bob();
    let _ = session.apply(group_created("g1"));
    let bob = ConversationId::from("bob");
    let _ = session.select_conversation(&bob).unwrap();
    let _ = session.select_conversation(&ConversationId::from("g1")).unwrap();

    let history: Vec<MessagePayload> = serde_json::from_value(json!([
        { "_id": "h-1", "senderId": "bob", "content": "old", "createdAt": "2024-04-01T10:00:00Z" }
    ]))
    .unwrap();
    let effects = session.apply_history(&bob, history.clone());
    assert!(!effects.changed);
    assert!(session.messages().messages(&bob).is_empty());

    let _ = session.select_conversation(&bob).unwrap();
    let effects = session.apply_history(&bob, history);
    assert!(effects.changed);
    assert_eq!(session.messages().messages(&bob).len(), 1);
    assert_eq!(
        effects.outbound,
        vec![ClientRequest::MarkAsSeen {
            message_id: MessageId::from("h-1"),
            recipient: Recipient::user(UserId::from("bob")),
        }]
    );
}

#[test]
fn delete_without_confirmation_stays_deleted() {
    let mut session = session_with_bob();
    let _ = session.apply(incoming("m-1", "bob"));
    let request = session.delete_message(&MessageId::from("m-1")).unwrap();
    assert_eq!(request.name(), "delete_message");
    assert!(session.messages().find(&MessageId::from("m-1")).is_none());

    // nothing the server sends afterwards brings it back
    let _ = session.apply(event(json!({
        "event": "message_deleted", "data": { "messageId": "m-1" }
    })));
    assert!(session.messages().find(&MessageId::from("m-1")).is_none());
}

#[test]
fn edits_are_speculative_until_confirmed() {
    let mut session = session_with_bob();
    let _ = session.apply(incoming("m-1", "bob"));
    let id = MessageId::from("m-1");

    let request = session.edit_message(&id, "changed").unwrap();
    assert_eq!(request.name(), "edit_message");
    assert_eq!(session.messages().find(&id).unwrap().content, "hello from bob");

    let _ = session.apply(event(json!({
        "event": "message_edited",
        "data": { "messageId": "m-1", "newContent": "changed", "editedAt": "2024-05-01T11:00:00Z" }
    })));
    let message = session.messages().find(&id).unwrap();
    assert_eq!(message.content, "changed");
    assert!(message.edited);
}

#[test]
fn pins_follow_server_events_only() {
    let mut session = session_with_bob();
    let bob = ConversationId::from("bob");
    let _ = session.apply(incoming("m-1", "bob"));

    let _ = session.pin_message(&MessageId::from("m-1"), true).unwrap();
    assert!(session.pinned(&bob).is_empty());

    let pinned = json!({
        "event": "message_pinned",
        "data": { "messageId": "m-1", "conversationId": "bob" }
    });
    let _ = session.apply(event(pinned.clone()));
    let _ = session.apply(event(pinned));
    assert_eq!(session.pinned(&bob).len(), 1);

    let _ = session.apply(event(json!({
        "event": "message_unpinned",
        "data": { "messageId": "m-1", "conversationId": "bob" }
    })));
    assert!(session.pinned(&bob).is_empty());
}

#[test]
fn reaction_round_trip_with_authoritative_map() {
    let mut session = session_with_bob();
    let id = MessageId::from("m-1");
    let _ = session.apply(incoming("m-1", "bob"));

    let _ = session.react(&id, "👍").unwrap();
    assert_eq!(session.messages().find(&id).unwrap().reactions.get(&me()), Some("👍"));
    let _ = session.remove_reaction(&id).unwrap();
    assert!(session.messages().find(&id).unwrap().reactions.is_empty());

    let _ = session.apply(event(json!({
        "event": "message_reacted",
        "data": { "messageId": "m-1", "reactions": [{ "userId": "bob", "reaction": "🎉" }] }
    })));
    let reactions = &session.messages().find(&id).unwrap().reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions.get(&UserId::from("bob")), Some("🎉"));
}

#[test]
fn server_counts_and_previews_overwrite_local_state() {
    let mut session = session_with_bob();
    let bob = ConversationId::from("bob");
    let _ = session.apply(incoming("m-1", "bob"));
    let _ = session.apply(incoming("m-2", "bob"));

    let _ = session.apply(event(json!({
        "event": "unread_count_update",
        "data": { "userId": "bob", "unreadCount": 7 }
    })));
    assert_eq!(session.directory().get(&bob).unwrap().unread_count, 7);

    let _ = session.apply(event(json!({
        "event": "last_message_updated",
        "data": {
            "participants": ["me", "bob"],
            "lastMessage": { "content": "from server", "timestamp": "2024-05-01T09:00:00Z" }
        }
    })));
    let preview = session.directory().get(&bob).unwrap().last_message.clone().unwrap();
    assert_eq!(preview.content, "from server");
}

#[test]
fn typing_and_presence_events_update_tracker() {
    let mut session = session_with_bob();
    let bob = UserId::from("bob");

    let _ = session.apply(event(json!({ "event": "user_typing", "data": { "from": "bob" } })));
    assert!(session.presence().is_typing(&bob));
    let _ = session.apply(event(json!({ "event": "stop_typing", "data": { "from": "bob" } })));
    assert!(!session.presence().is_typing(&bob));

    let _ = session.apply(event(json!({ "event": "userOnline", "data": { "userId": "bob" } })));
    assert!(session.presence().is_online(&bob));
    let _ = session.apply(event(json!({ "event": "getOnlineUsers", "data": [] })));
    assert!(!session.presence().is_online(&bob));
}

#[test]
fn group_actions_require_a_group() {
    let session = session_with_bob();
    let err = session.leave_group(&ConversationId::from("bob")).unwrap_err();
    assert!(matches!(err, SyncError::NotGroupMember(_)));
    let err = session.delete_group(&ConversationId::from("nope")).unwrap_err();
    assert!(matches!(err, SyncError::UnknownConversation(_)));
    assert!(matches!(
        session.create_group("  ", vec![]).unwrap_err(),
        SyncError::EmptyContent
    ));
}

#[test]
fn pinned_history_shows_in_the_pinned_view() {
    let mut session = session_with_bob();
    let bob = ConversationId::from("bob");
    let _ = session.select_conversation(&bob).unwrap();

    let history: Vec<MessagePayload> = serde_json::from_value(json!([
        { "_id": "h-1", "senderId": "bob", "content": "keep this", "createdAt": "2024-04-01T10:00:00Z", "isPinned": true },
        { "_id": "h-2", "senderId": "bob", "content": "chatter", "createdAt": "2024-04-01T10:01:00Z" }
    ]))
    .unwrap();
    let _ = session.apply_history(&bob, history);

    let pinned: Vec<&str> = session
        .pinned(&bob)
        .iter()
        .map(|message| message.id.as_str())
        .collect();
    assert_eq!(pinned, vec!["h-1"]);

    let _ = session.apply(event(json!({
        "event": "receive_message",
        "data": {
            "_id": "m-5", "senderId": "bob", "receiverId": "me", "content": "pinned on arrival",
            "createdAt": "2024-05-01T10:00:00Z", "pinned": true
        }
    })));
    assert_eq!(session.pinned(&bob).len(), 2);
}

#[test]
fn group_without_known_creator_is_purged_when_i_am_removed() {
    let mut session = SessionState::new(me());
    let group = ConversationId::from("g3");
    let _ = session.apply(event(json!({
        "event": "group_created",
        "data": {
            "_id": "g3", "groupName": "no owner",
            "participants": ["bob", "me"],
            "participantsStatus": { "bob": "joined", "me": "joined" }
        }
    })));
    let _ = session.apply(event(json!({
        "event": "receive_message",
        "data": {
            "_id": "m-1", "senderId": "bob", "groupId": "g3",
            "content": "hi", "createdAt": "2024-05-01T10:00:00Z"
        }
    })));
    assert_eq!(session.messages().messages(&group).len(), 1);

    let effects = session.apply(event(json!({
        "event": "user_removed_from_group",
        "data": { "conversationId": "g3", "participants": ["me"] }
    })));

    assert!(effects.changed);
    assert!(!session.directory().contains(&group));
    assert!(session.messages().messages(&group).is_empty());
}

#[test]
fn receipts_naming_the_server_id_before_the_echo_end_at_seen() {
    let mut session = session_with_bob();
    let bob = ConversationId::from("bob");
    let _ = session.select_conversation(&bob).unwrap();
    let (client_id, _) = session
        .send_message("hi", MessageKind::Text, None, MessageId::from("c-1"), now())
        .unwrap();

    let _ = session.apply(event(json!({
        "event": "message_delivered", "data": { "messageId": "m-77" }
    })));
    let _ = session.apply(event(json!({
        "event": "message_seen", "data": { "messageId": "m-77" }
    })));
    let _ = session.apply(event(json!({
        "event": "receive_message",
        "data": {
            "_id": "m-77", "clientId": "c-1", "senderId": "me", "receiverId": "bob",
            "content": "hi", "status": "sent", "createdAt": "2024-05-01T10:00:01Z"
        }
    })));

    let message = session.messages().find(&client_id).unwrap();
    assert_eq!(message.server_id, Some(MessageId::from("m-77")));
    assert_eq!(message.status, MessageStatus::Seen);
}

#[test]
fn late_message_for_a_deleted_group_is_dropped() {
    let mut session = SessionState::new(me());
    let group = ConversationId::from("g1");
    let _ = session.apply(group_created("g1"));
    let _ = session.apply(event(json!({
        "event": "group_deleted", "data": { "conversationId": "g1" }
    })));

    let effects = session.apply(event(json!({
        "event": "receive_message",
        "data": {
            "_id": "m-9", "senderId": "bob", "groupId": "g1",
            "content": "too late", "createdAt": "2024-05-01T10:00:00Z"
        }
    })));

    assert!(!effects.changed);
    assert!(effects.outbound.is_empty());
    assert!(session.messages().messages(&group).is_empty());
    assert!(session.messages().find(&MessageId::from("m-9")).is_none());
}
