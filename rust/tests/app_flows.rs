mod support;

use std::time::Duration;

use chat_sync_core::memory::{InMemoryRemoteLog, InMemoryUserDirectory};
use chat_sync_core::{AppAction, AuthState, FeedHealth, MessageDeliveryState};
use support::{post, wait_until, Client, TIMEOUT};

fn directory() -> InMemoryUserDirectory {
    let dir = InMemoryUserDirectory::new();
    dir.insert_named("alice", "Alice");
    dir.insert_named("bob", "Bob");
    dir.insert_named("carol", "Carol");
    dir
}

#[test]
fn sign_in_publishes_profile_and_live_chat_list() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");

    let s = alice.state();
    assert_eq!(
        s.auth,
        AuthState::SignedIn {
            user_id: "alice".into()
        }
    );
    alice.wait("own profile", |s| {
        s.my_profile
            .as_ref()
            .is_some_and(|p| p.display_name == "Alice")
    });
    assert!(s.chat_list.is_empty());
    assert_eq!(log.open_subscriptions(), 1);
}

#[test]
fn actions_before_sign_in_are_refused() {
    let log = InMemoryRemoteLog::new();
    let app = Client::new(&log, &directory(), serde_json::json!({}));
    app.send("alice_bob", "hello");
    wait_until("toast", TIMEOUT, || app.updates.last_toast().is_some());
    assert_eq!(app.updates.last_toast().as_deref(), Some("Please sign in first"));
    assert!(log.messages("alice_bob").is_empty());
}

#[test]
fn sent_messages_show_up_in_order_and_move_the_chat_list() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.start_chat("bob");

    for text in ["one", "two", "three"] {
        alice.send("alice_bob", text);
    }
    alice.wait("all confirmed", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            c.messages.len() == 3
                && c.messages
                    .iter()
                    .all(|m| m.delivery == MessageDeliveryState::Sent)
        })
    });
    assert_eq!(alice.texts(), ["one", "two", "three"]);

    let msgs = alice.messages();
    assert!(msgs
        .windows(2)
        .all(|w| (w[0].created_at, &w[0].id) <= (w[1].created_at, &w[1].id)));
    assert!(msgs.iter().all(|m| m.is_mine));

    alice.wait("chat list row", |s| {
        s.chat_list.len() == 1
            && s.chat_list[0].chat_id == "alice_bob"
            && s.chat_list[0].last_message_preview == "three"
            && s.chat_list[0].peer_name == "Bob"
    });
}

#[test]
fn blank_messages_are_ignored() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.start_chat("bob");

    alice.send("alice_bob", "   \n  ");
    alice.send("alice_bob", "  real  ");
    alice.wait("one message", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            c.messages.len() == 1 && c.messages[0].delivery == MessageDeliveryState::Sent
        })
    });
    assert_eq!(alice.texts(), ["real"]);
    assert_eq!(log.messages("alice_bob").len(), 1);
    assert_eq!(alice.state().toast, None);
}

#[test]
fn a_send_is_never_shown_twice() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.start_chat("bob");
    log.set_append_delay(Some(Duration::from_millis(200)));

    alice.send("alice_bob", "hi");
    alice.wait("confirmed", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            c.messages.len() == 1 && c.messages[0].delivery == MessageDeliveryState::Sent
        })
    });

    let states = alice.updates.states();
    let mut saw_pending = false;
    for s in &states {
        let Some(chat) = &s.current_chat else {
            continue;
        };
        let copies: Vec<_> = chat.messages.iter().filter(|m| m.text == "hi").collect();
        assert!(copies.len() <= 1, "rev {}: {} copies", s.rev, copies.len());
        if copies
            .first()
            .is_some_and(|m| m.delivery == MessageDeliveryState::Pending)
        {
            saw_pending = true;
        }
    }
    assert!(saw_pending, "the pending state was never published");

    let confirmed = &alice.messages()[0];
    assert!(confirmed.local_id.is_some());
    assert_ne!(Some(&confirmed.id), confirmed.local_id.as_ref());
}

#[test]
fn state_revisions_strictly_increase() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.start_chat("bob");
    alice.send("alice_bob", "a");
    alice.send("alice_bob", "b");
    alice.wait("both sent", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            c.messages.len() == 2
                && c.messages
                    .iter()
                    .all(|m| m.delivery == MessageDeliveryState::Sent)
        })
    });
    let revs: Vec<u64> = alice.updates.states().iter().map(|s| s.rev).collect();
    assert!(revs.windows(2).all(|w| w[0] < w[1]), "{revs:?}");
}

#[test]
fn unread_accumulates_and_resets_when_opened() {
    let log = InMemoryRemoteLog::new();
    let dir = directory();
    let alice = Client::signed_in(&log, &dir, "alice");
    alice.start_chat("bob");
    for text in ["1", "2", "3"] {
        alice.send("alice_bob", text);
    }
    wait_until("bob has 3 unread", TIMEOUT, || {
        log.conversation("alice_bob")
            .is_some_and(|c| c.unread_for("bob") == 3)
    });
    // Alice has the chat open and sent everything herself.
    assert_eq!(log.conversation("alice_bob").unwrap().unread_for("alice"), 0);

    // Bob's first chat list auto-opens the conversation, which reads it.
    let bob = Client::signed_in(&log, &dir, "bob");
    bob.wait("chat open", |s| s.selected_chat_id.as_deref() == Some("alice_bob"));
    wait_until("bob's counter reset", TIMEOUT, || {
        log.conversation("alice_bob")
            .is_some_and(|c| c.unread_for("bob") == 0)
    });
    bob.wait("badge cleared", |s| {
        s.chat_list.len() == 1 && s.chat_list[0].unread_count == 0
    });
    bob.wait("history", |s| {
        s.current_chat.as_ref().is_some_and(|c| c.messages.len() == 3)
    });
    assert!(bob.messages().iter().all(|m| !m.is_mine));
}

#[test]
fn unread_updates_survive_transient_failures() {
    let log = InMemoryRemoteLog::new();
    let dir = directory();
    let alice = Client::signed_in(&log, &dir, "alice");
    alice.start_chat("bob");

    log.fail_next_unread_updates(1);
    for text in ["1", "2", "3"] {
        alice.send("alice_bob", text);
    }
    wait_until("bob has 3 unread", TIMEOUT, || {
        log.conversation("alice_bob")
            .is_some_and(|c| c.unread_for("bob") == 3)
    });

    // The reset issued by Bob's auto-open hits an outage too.
    log.fail_next_unread_updates(1);
    let bob = Client::signed_in(&log, &dir, "bob");
    bob.wait("chat open", |s| s.selected_chat_id.as_deref() == Some("alice_bob"));
    wait_until("bob's counter reset", TIMEOUT, || {
        log.conversation("alice_bob")
            .is_some_and(|c| c.unread_for("bob") == 0)
    });
}

#[test]
fn unread_badge_counts_messages_in_other_chats() {
    let log = InMemoryRemoteLog::new();
    let dir = directory();
    let bob = Client::signed_in(&log, &dir, "bob");
    let alice = Client::signed_in(&log, &dir, "alice");

    // Bob looks at a different conversation while Alice writes.
    bob.start_chat("carol");
    alice.start_chat("bob");
    alice.send("alice_bob", "ping");
    alice.send("alice_bob", "ping again");

    bob.wait("badge", |s| {
        s.chat_list
            .iter()
            .any(|c| c.chat_id == "alice_bob" && c.unread_count == 2)
    });
    assert_eq!(bob.state().selected_chat_id.as_deref(), Some("bob_carol"));

    bob.open_chat("alice_bob");
    bob.wait("badge cleared", |s| {
        s.chat_list
            .iter()
            .any(|c| c.chat_id == "alice_bob" && c.unread_count == 0)
    });
}

#[test]
fn first_chat_list_auto_selects_most_recent_once() {
    let log = InMemoryRemoteLog::new();
    post(&log, "bob", "alice", "older");
    post(&log, "carol", "alice", "newer");

    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.wait("auto selected", |s| {
        s.selected_chat_id.as_deref() == Some("alice_carol")
            && s.current_chat
                .as_ref()
                .is_some_and(|c| c.chat_id == "alice_carol")
    });
    let order: Vec<String> = alice
        .state()
        .chat_list
        .iter()
        .map(|c| c.chat_id.clone())
        .collect();
    assert_eq!(order, ["alice_carol", "alice_bob"]);

    alice.open_chat("alice_bob");
    post(&log, "carol", "alice", "newest");
    alice.wait("carol on top", |s| {
        s.chat_list.first().is_some_and(|c| {
            c.chat_id == "alice_carol" && c.last_message_preview == "newest"
        })
    });
    assert_eq!(alice.state().selected_chat_id.as_deref(), Some("alice_bob"));
}

#[test]
fn manual_selection_is_not_overridden_by_first_population() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.start_chat("carol");

    post(&log, "bob", "alice", "hello");
    alice.wait("conversation indexed", |s| {
        s.chat_list.iter().any(|c| c.chat_id == "alice_bob")
    });
    let s = alice.state();
    assert_eq!(s.selected_chat_id.as_deref(), Some("alice_carol"));
    assert_eq!(s.current_chat.unwrap().chat_id, "alice_carol");
}

#[test]
fn closed_chat_feed_delivers_nothing() {
    let log = InMemoryRemoteLog::new();
    post(&log, "bob", "alice", "first");
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.open_chat("alice_bob");
    assert_eq!(alice.texts(), ["first"]);
    assert_eq!(log.open_subscriptions(), 2);

    alice.dispatch(AppAction::CloseChat);
    alice.wait("closed", |s| {
        s.current_chat.is_none() && s.feeds.messages == FeedHealth::Idle
    });
    assert_eq!(log.open_subscriptions(), 1);

    post(&log, "bob", "alice", "second");
    alice.wait("preview", |s| {
        s.chat_list
            .first()
            .is_some_and(|c| c.last_message_preview == "second")
    });
    assert!(alice.state().current_chat.is_none());
}

#[test]
fn switching_chats_drops_the_old_feed() {
    let log = InMemoryRemoteLog::new();
    post(&log, "bob", "alice", "from bob");
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.open_chat("alice_bob");
    alice.start_chat("carol");
    assert_eq!(log.open_subscriptions(), 2);

    post(&log, "bob", "alice", "bob again");
    alice.wait("preview", |s| {
        s.chat_list
            .iter()
            .any(|c| c.chat_id == "alice_bob" && c.last_message_preview == "bob again")
    });
    let chat = alice.state().current_chat.unwrap();
    assert_eq!(chat.chat_id, "alice_carol");
    assert!(chat.messages.is_empty());
}

#[test]
fn edits_and_deletes_reach_the_open_chat() {
    let log = InMemoryRemoteLog::new();
    let first = post(&log, "bob", "alice", "typo");
    post(&log, "bob", "alice", "keep");
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.open_chat("alice_bob");

    assert!(log.edit_message("alice_bob", &first, "fixed"));
    alice.wait("edited", |_| alice.texts() == ["fixed", "keep"]);

    assert!(log.delete_message("alice_bob", &first));
    alice.wait("deleted", |_| alice.texts() == ["keep"]);
}

#[test]
fn failed_send_stays_visible_and_retries_in_place() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.start_chat("bob");

    log.fail_next_appends(1);
    alice.send("alice_bob", "hello");
    alice.wait("failed", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            c.messages.len() == 1
                && matches!(c.messages[0].delivery, MessageDeliveryState::Failed { .. })
        })
    });
    assert!(log.messages("alice_bob").is_empty());
    let local_id = alice.messages()[0].local_id.clone().unwrap();

    alice.dispatch(AppAction::RetryMessage {
        chat_id: "alice_bob".into(),
        local_id: local_id.clone(),
    });
    alice.wait("sent", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            c.messages.len() == 1 && c.messages[0].delivery == MessageDeliveryState::Sent
        })
    });
    let stored = log.messages("alice_bob");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].local_id.as_deref(), Some(local_id.as_str()));
}

#[test]
fn transient_append_failures_are_retried_before_giving_up() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in_with(
        &log,
        &directory(),
        "alice",
        serde_json::json!({ "send_max_attempts": 3 }),
    );
    alice.start_chat("bob");

    log.fail_next_appends(2);
    alice.send("alice_bob", "persistent");
    alice.wait("sent", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            c.messages.len() == 1 && c.messages[0].delivery == MessageDeliveryState::Sent
        })
    });
    assert!(alice
        .updates
        .states()
        .iter()
        .filter_map(|s| s.current_chat.as_ref())
        .flat_map(|c| c.messages.iter())
        .all(|m| !matches!(m.delivery, MessageDeliveryState::Failed { .. })));
}

#[test]
fn outstanding_sends_survive_switching_away_and_back() {
    let log = InMemoryRemoteLog::new();
    post(&log, "bob", "alice", "hey");
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.open_chat("alice_bob");

    log.set_append_delay(Some(Duration::from_millis(300)));
    alice.send("alice_bob", "slow");
    alice.start_chat("carol");
    alice.open_chat("alice_bob");
    assert!(alice.texts().contains(&"slow".to_string()));

    alice.wait("confirmed once", |s| {
        s.current_chat.as_ref().is_some_and(|c| {
            let slow: Vec<_> = c.messages.iter().filter(|m| m.text == "slow").collect();
            slow.len() == 1 && slow[0].delivery == MessageDeliveryState::Sent
        })
    });
    assert_eq!(alice.texts(), ["hey", "slow"]);
}

#[test]
fn feeds_come_back_after_a_disruption() {
    let log = InMemoryRemoteLog::new();
    post(&log, "bob", "alice", "before");
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.open_chat("alice_bob");

    log.disrupt_feeds();
    assert_eq!(log.open_subscriptions(), 0);
    wait_until("resubscribed", TIMEOUT, || {
        let s = alice.state();
        log.open_subscriptions() == 2
            && s.feeds.chat_list == FeedHealth::Live
            && s.feeds.messages == FeedHealth::Live
    });
    wait_until("reconnect published", TIMEOUT, || {
        alice
            .updates
            .states()
            .iter()
            .any(|s| matches!(s.feeds.messages, FeedHealth::Reconnecting { .. }))
    });

    post(&log, "bob", "alice", "after");
    alice.wait("new message", |_| alice.texts() == ["before", "after"]);
}

#[test]
fn exhausted_resubscribes_surface_an_error_until_foregrounded() {
    let log = InMemoryRemoteLog::new();
    let app = Client::new(
        &log,
        &directory(),
        serde_json::json!({ "resubscribe_max_attempts": 2 }),
    );
    log.fail_next_subscribes(3);
    app.dispatch(AppAction::SignIn {
        user_id: "alice".into(),
    });
    app.wait("failed", |s| matches!(s.feeds.chat_list, FeedHealth::Failed { .. }));
    let toast = app.state().toast.unwrap_or_default();
    assert!(toast.contains("chat list feed lost"), "{toast}");

    app.dispatch(AppAction::ClearToast);
    app.dispatch(AppAction::Foregrounded);
    app.wait("live", |s| s.feeds.chat_list == FeedHealth::Live && s.toast.is_none());
    assert_eq!(log.open_subscriptions(), 1);
}

#[test]
fn sign_out_leaves_no_subscriptions_behind() {
    let log = InMemoryRemoteLog::new();
    post(&log, "bob", "alice", "hi");
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.wait("auto-opened", |s| s.feeds.messages == FeedHealth::Live);
    assert_eq!(log.open_subscriptions(), 2);

    alice.dispatch(AppAction::SignOut);
    alice.wait("signed out", |s| {
        s.auth == AuthState::SignedOut
            && s.chat_list.is_empty()
            && s.current_chat.is_none()
            && s.my_profile.is_none()
    });
    wait_until("unsubscribed", TIMEOUT, || log.open_subscriptions() == 0);

    // Signing in again starts clean.
    alice.dispatch(AppAction::SignIn {
        user_id: "alice".into(),
    });
    alice.wait("back", |s| {
        s.chat_list.len() == 1 && s.selected_chat_id.as_deref() == Some("alice_bob")
    });
}

#[test]
fn unknown_profiles_use_placeholders_until_foregrounded() {
    let log = InMemoryRemoteLog::new();
    let dir = directory();
    post(&log, "dave", "alice", "who am i");
    post(&log, "bob", "alice", "hi");

    let alice = Client::signed_in(&log, &dir, "alice");
    alice.wait("names", |s| {
        let name = |id: &str| {
            s.chat_list
                .iter()
                .find(|c| c.peer_id == id)
                .map(|c| c.peer_name.clone())
        };
        name("bob").as_deref() == Some("Bob") && name("dave").as_deref() == Some("Unknown")
    });

    dir.insert_named("dave", "Dave");
    alice.dispatch(AppAction::Foregrounded);
    alice.wait("dave resolved", |s| {
        s.chat_list
            .iter()
            .any(|c| c.peer_id == "dave" && c.peer_name == "Dave")
    });
}

#[test]
fn viewing_a_profile_fetches_it() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.dispatch(AppAction::ViewProfile {
        user_id: "carol".into(),
    });
    alice.wait("carol", |s| {
        s.peer_profile
            .as_ref()
            .is_some_and(|p| p.user_id == "carol" && p.display_name == "Carol")
    });
    alice.dispatch(AppAction::CloseProfile);
    alice.wait("closed", |s| s.peer_profile.is_none());
}

#[test]
fn missing_profile_reports_the_lookup_failure() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.dispatch(AppAction::ViewProfile {
        user_id: "zed".into(),
    });
    alice.wait("zed failed", |s| {
        s.peer_profile.as_ref().is_some_and(|p| {
            p.display_name == "Unknown" && p.lookup_error.as_deref() == Some("no profile for zed")
        })
    });
}

#[test]
fn chat_filter_narrows_the_list() {
    let log = InMemoryRemoteLog::new();
    post(&log, "bob", "alice", "lunch?");
    post(&log, "carol", "alice", "meeting moved");
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.wait("both", |s| s.chat_list.len() == 2);

    alice.dispatch(AppAction::SetChatFilter {
        query: "LUNCH".into(),
    });
    alice.wait("filtered", |s| {
        s.chat_filter == "LUNCH" && s.chat_list.len() == 1 && s.chat_list[0].peer_id == "bob"
    });

    alice.dispatch(AppAction::SetChatFilter { query: "".into() });
    alice.wait("unfiltered", |s| s.chat_list.len() == 2);
}

#[test]
fn cannot_start_a_chat_with_yourself() {
    let log = InMemoryRemoteLog::new();
    let alice = Client::signed_in(&log, &directory(), "alice");
    alice.dispatch(AppAction::StartChat {
        peer_id: "alice".into(),
    });
    alice.wait("toast", |s| s.toast.is_some());
    assert!(alice.state().current_chat.is_none());
}
