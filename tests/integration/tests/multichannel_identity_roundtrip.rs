//! End-to-end scenarios across identity, channels, conversations, presence,
//! and the chatroom view.

use std::sync::Arc;
use std::time::Duration;

use lobby_channels::{ChannelFriendRegistry, InMemoryChannelFriendRegistry};
use lobby_chatroom::{ChannelAvailability, ChatroomSessionAssembler};
use lobby_contract::ChannelKind;
use lobby_conversation::{
    thread_key, ConversationMessageLog, ConversationThreadStore, InMemoryConversationStore,
    MessageDirection, SqliteConversationStore,
};
use lobby_identity::{
    ChannelLogin, InMemoryMemberStore, MemberStore, MergeDecision, MergeEngine, SqliteMemberStore,
};
use lobby_presence::SessionContinuityTracker;

struct Stack {
    members: Arc<dyn MemberStore>,
    line_friends: Arc<dyn ChannelFriendRegistry>,
    facebook_friends: Arc<dyn ChannelFriendRegistry>,
    webchat_friends: Arc<dyn ChannelFriendRegistry>,
    threads: Arc<dyn ConversationThreadStore>,
    messages: Arc<dyn ConversationMessageLog>,
}

impl Stack {
    fn in_memory() -> Self {
        let conversations = Arc::new(InMemoryConversationStore::new());
        Self {
            members: Arc::new(InMemoryMemberStore::new()),
            line_friends: Arc::new(InMemoryChannelFriendRegistry::new(ChannelKind::Line)),
            facebook_friends: Arc::new(InMemoryChannelFriendRegistry::new(ChannelKind::Facebook)),
            webchat_friends: Arc::new(InMemoryChannelFriendRegistry::new(ChannelKind::Webchat)),
            threads: Arc::clone(&conversations) as Arc<dyn ConversationThreadStore>,
            messages: conversations as Arc<dyn ConversationMessageLog>,
        }
    }

    fn sqlite(dir: &std::path::Path) -> Self {
        let conversations =
            Arc::new(SqliteConversationStore::open(&dir.join("conversations.db")).expect("open"));
        Self {
            members: Arc::new(SqliteMemberStore::open(&dir.join("members.db")).expect("open")),
            line_friends: Arc::new(
                lobby_channels::SqliteChannelFriendRegistry::open(
                    ChannelKind::Line,
                    &dir.join("friends.db"),
                )
                .expect("open"),
            ),
            facebook_friends: Arc::new(
                lobby_channels::SqliteChannelFriendRegistry::open(
                    ChannelKind::Facebook,
                    &dir.join("friends.db"),
                )
                .expect("open"),
            ),
            webchat_friends: Arc::new(
                lobby_channels::SqliteChannelFriendRegistry::open(
                    ChannelKind::Webchat,
                    &dir.join("friends.db"),
                )
                .expect("open"),
            ),
            threads: Arc::clone(&conversations) as Arc<dyn ConversationThreadStore>,
            messages: conversations as Arc<dyn ConversationMessageLog>,
        }
    }

    fn engine(&self) -> MergeEngine {
        MergeEngine::new(
            Arc::clone(&self.members),
            Arc::clone(&self.line_friends),
            Arc::clone(&self.facebook_friends),
            Arc::clone(&self.webchat_friends),
            Arc::clone(&self.threads),
            Arc::clone(&self.messages),
        )
    }

    fn assembler(&self) -> ChatroomSessionAssembler {
        ChatroomSessionAssembler::new(
            Arc::clone(&self.members),
            Arc::clone(&self.line_friends),
            Arc::clone(&self.facebook_friends),
            Arc::clone(&self.webchat_friends),
            Arc::clone(&self.threads),
            Arc::clone(&self.messages),
        )
    }
}

fn login(channel: ChannelKind, uid: &str, email: Option<&str>, at: u64) -> ChannelLogin {
    ChannelLogin {
        channel,
        channel_uid: uid.to_string(),
        email: email.map(str::to_string),
        display_name: None,
        avatar_url: None,
        timestamp_ms: at,
    }
}

#[test]
fn integration_line_login_links_into_existing_facebook_member() {
    let stack = Stack::in_memory();
    let engine = stack.engine();

    let facebook = engine
        .resolve_login(&login(
            ChannelKind::Facebook,
            "F321",
            Some("user@example.com"),
            1_000,
        ))
        .expect("facebook login");
    let line = engine
        .resolve_login(&login(
            ChannelKind::Line,
            "U123",
            Some("user@example.com"),
            2_000,
        ))
        .expect("line login");

    assert_eq!(line.member_id, facebook.member_id);
    assert_eq!(line.decision, MergeDecision::EmailMatch);

    let member = stack
        .members
        .find(&line.member_id)
        .expect("find")
        .expect("member exists");
    assert_eq!(member.channel_uid(ChannelKind::Line), Some("U123"));
    assert_eq!(member.channel_uid(ChannelKind::Facebook), Some("F321"));

    // Both threads exist and the agent's channel switcher lists both.
    assert!(stack
        .threads
        .find_thread(&thread_key(ChannelKind::Line, "U123"))
        .expect("find thread")
        .is_some());
    assert!(stack
        .threads
        .find_thread(&thread_key(ChannelKind::Facebook, "F321"))
        .expect("find thread")
        .is_some());
    let session = stack
        .assembler()
        .open(&line.member_id, true, 3_000)
        .expect("open chatroom");
    assert_eq!(
        session.available_platforms,
        vec![ChannelKind::Line, ChannelKind::Facebook]
    );
}

#[test]
fn integration_deferred_merge_collapses_uid_only_member() {
    let stack = Stack::in_memory();
    let engine = stack.engine();

    let original = engine
        .resolve_login(&login(
            ChannelKind::Facebook,
            "F321",
            Some("user@example.com"),
            1_000,
        ))
        .expect("facebook login");
    let newcomer = engine
        .resolve_login(&login(ChannelKind::Line, "U888", None, 2_000))
        .expect("line login without email");
    assert_ne!(newcomer.member_id, original.member_id);

    let registration = engine
        .register_email(&newcomer.member_id, "user@example.com", 3_000)
        .expect("register email");
    assert_eq!(registration.member_id, original.member_id);

    assert!(stack
        .members
        .find(&newcomer.member_id)
        .expect("find")
        .is_none());
    let friend = stack
        .line_friends
        .find("U888")
        .expect("find friend")
        .expect("friend exists");
    assert_eq!(friend.member_id.as_deref(), Some(original.member_id.as_str()));
    let thread = stack
        .threads
        .find_thread(&thread_key(ChannelKind::Line, "U888"))
        .expect("find thread")
        .expect("thread exists");
    assert_eq!(thread.member_id, original.member_id);
}

#[tokio::test]
async fn integration_webchat_grace_window_round_trip() {
    let stack = Stack::in_memory();
    let engine = stack.engine();
    let tracker = SessionContinuityTracker::new(
        Arc::clone(&stack.webchat_friends),
        Duration::from_millis(50),
    );

    let uid = tracker.ensure_uid(None);
    engine
        .resolve_login(&login(ChannelKind::Webchat, &uid, None, 1_000))
        .expect("webchat login");
    tracker.handle_connect(&uid, 1_000).expect("connect");
    assert!(tracker.is_online(&uid).expect("is_online"));

    // Disconnect answered inside the grace window: same session continues,
    // unfollowed_at is never written.
    tracker.handle_disconnect(&uid, 2_000).expect("disconnect");
    tokio::time::sleep(Duration::from_millis(10)).await;
    tracker.handle_connect(&uid, 2_100).expect("reconnect");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let friend = stack
        .webchat_friends
        .find(&uid)
        .expect("find friend")
        .expect("friend exists");
    assert!(friend.is_following);
    assert_eq!(friend.unfollowed_at_unix_ms, None);

    // Disconnect left unanswered: confirmed offline at the deadline.
    tracker.handle_disconnect(&uid, 9_000).expect("disconnect");
    tokio::time::sleep(Duration::from_millis(120)).await;
    let friend = stack
        .webchat_friends
        .find(&uid)
        .expect("find friend")
        .expect("friend exists");
    assert!(!friend.is_following);
    assert_eq!(friend.unfollowed_at_unix_ms, Some(9_050));

    let session = stack
        .assembler()
        .open(
            &stack
                .webchat_friends
                .find(&uid)
                .expect("find friend")
                .and_then(|f| f.member_id)
                .expect("linked member"),
            true,
            10_000,
        )
        .expect("open chatroom");
    assert_eq!(
        session.availability.get(&ChannelKind::Webchat),
        Some(&ChannelAvailability::Offline)
    );
}

#[test]
fn integration_message_ingest_builds_merged_timeline() {
    let stack = Stack::in_memory();
    let engine = stack.engine();

    let line = engine
        .resolve_login(&login(
            ChannelKind::Line,
            "U123",
            Some("user@example.com"),
            1_000,
        ))
        .expect("line login");
    engine
        .resolve_login(&login(
            ChannelKind::Webchat,
            "W555",
            Some("user@example.com"),
            2_000,
        ))
        .expect("webchat login");

    stack
        .messages
        .append_message(
            &thread_key(ChannelKind::Webchat, "W555"),
            "from the widget",
            MessageDirection::Incoming,
            5_000,
        )
        .expect("append webchat message");
    stack
        .messages
        .append_message(
            &thread_key(ChannelKind::Line, "U123"),
            "from LINE",
            MessageDirection::Incoming,
            3_000,
        )
        .expect("append line message");

    let timeline = stack
        .assembler()
        .merged_timeline(&line.member_id)
        .expect("timeline");
    let labels = timeline
        .iter()
        .map(|message| (message.channel.display_label(), message.content.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        labels,
        vec![("LINE", "from LINE"), ("Webchat", "from the widget")]
    );
}

#[test]
fn integration_sqlite_backed_stack_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stack = Stack::sqlite(dir.path());
    let engine = stack.engine();

    let facebook = engine
        .resolve_login(&login(
            ChannelKind::Facebook,
            "F321",
            Some("user@example.com"),
            1_000,
        ))
        .expect("facebook login");
    let line = engine
        .resolve_login(&login(
            ChannelKind::Line,
            "U123",
            Some("user@example.com"),
            2_000,
        ))
        .expect("line login");
    assert_eq!(line.member_id, facebook.member_id);

    let newcomer = engine
        .resolve_login(&login(ChannelKind::Webchat, "W777", None, 3_000))
        .expect("webchat login");
    let registration = engine
        .register_email(&newcomer.member_id, "user@example.com", 4_000)
        .expect("register email");
    assert_eq!(registration.member_id, facebook.member_id);

    let session = stack
        .assembler()
        .open(&facebook.member_id, true, 5_000)
        .expect("open chatroom");
    assert_eq!(
        session.available_platforms,
        vec![ChannelKind::Line, ChannelKind::Facebook, ChannelKind::Webchat]
    );
    assert_eq!(session.default_platform, Some(ChannelKind::Webchat));
}
