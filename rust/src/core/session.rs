// Session lifecycle, chat selection and feed application.

use super::chat_index::ChatIndex;
use super::message_cache::LocalMessageCache;
use super::outbox::SendQueue;
use super::profiles::ProfileBook;
use super::subscriptions::{FeedKind, Interruption, Topic};
use super::*;
use crate::model::{conversation_id_for, Conversation, Message};
use crate::remote::FeedEvent;

/// The conversation on screen.
pub(super) struct ActiveChat {
    pub(super) chat_id: String,
    pub(super) participants: Vec<String>,
    pub(super) cache: LocalMessageCache,
}

pub(super) struct Session {
    pub(super) user_id: String,
    /// Async results tagged with an older epoch belong to a previous session.
    pub(super) epoch: u64,
    pub(super) index: ChatIndex,
    pub(super) profiles: ProfileBook,
    pub(super) outbox: SendQueue,
    pub(super) active: Option<ActiveChat>,
    pub(super) viewing_profile: Option<String>,
}

impl Session {
    fn new(user_id: String, epoch: u64) -> Self {
        Self {
            index: ChatIndex::new(user_id.clone()),
            user_id,
            epoch,
            profiles: ProfileBook::default(),
            outbox: SendQueue::default(),
            active: None,
            viewing_profile: None,
        }
    }

    /// Participants of an indexed conversation, or of the open draft chat
    /// that the log has not created yet.
    pub(super) fn participants_of(&self, chat_id: &str) -> Option<Vec<String>> {
        if let Some(c) = self.index.get(chat_id) {
            return Some(c.participants.clone());
        }
        self.active
            .as_ref()
            .filter(|a| a.chat_id == chat_id)
            .map(|a| a.participants.clone())
    }

    /// Newest timestamp known for `chat_id`: the open cache when it is on
    /// screen, otherwise the conversation's last activity.
    pub(super) fn latest_visible(&self, chat_id: &str) -> Option<i64> {
        let cached = self
            .active
            .as_ref()
            .filter(|a| a.chat_id == chat_id)
            .and_then(|a| a.cache.latest_created_at());
        let indexed = self.index.get(chat_id).map(|c| c.updated_at);
        cached.max(indexed)
    }

    pub(super) fn active_for_mut(&mut self, chat_id: &str) -> Option<&mut ActiveChat> {
        self.active.as_mut().filter(|a| a.chat_id == chat_id)
    }
}

impl AppCore {
    pub(super) fn start_session(&mut self, user_id: &str) {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            self.toast("User id required");
            return;
        }
        // Tear down any existing session first.
        self.stop_session();

        self.epoch += 1;
        tracing::info!(%user_id, epoch = self.epoch, "start_session");
        self.session = Some(Session::new(user_id.to_string(), self.epoch));
        self.state.auth = AuthState::SignedIn {
            user_id: user_id.to_string(),
        };

        self.feeds.open(Topic::ChatList {
            user_id: user_id.to_string(),
        });
        self.request_profiles([user_id]);

        self.sync_feed_status();
        self.refresh_all();
        self.emit_state();
    }

    pub(super) fn stop_session(&mut self) {
        self.feeds.close_all();
        if let Some(sess) = self.session.take() {
            tracing::info!(user_id = %sess.user_id, dropped_sends = sess.outbox.len(), "stop_session");
        }
        self.handle_auth_transition();
    }

    fn handle_auth_transition(&mut self) {
        self.state.auth = AuthState::SignedOut;
        self.state.my_profile = None;
        self.state.chat_list = vec![];
        self.state.chat_filter = String::new();
        self.state.selected_chat_id = None;
        self.state.current_chat = None;
        self.state.peer_profile = None;
        self.state.feeds = FeedStatus::idle();
    }

    pub(super) fn open_chat(&mut self, chat_id: &str) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let Some(participants) = sess.participants_of(chat_id) else {
            self.toast("Chat not found");
            return;
        };
        self.select_chat(chat_id, participants);
        self.emit_state();
    }

    /// Open the one-to-one conversation with `peer_id`, whether or not it
    /// exists yet. The log creates it on the first send.
    pub(super) fn start_chat(&mut self, peer_id: &str) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let peer_id = peer_id.trim();
        if peer_id.is_empty() || peer_id == sess.user_id {
            self.toast("Pick someone else to chat with");
            return;
        }
        let chat_id = conversation_id_for(&sess.user_id, peer_id);
        let participants = vec![sess.user_id.clone(), peer_id.to_string()];
        self.select_chat(&chat_id, participants);
        self.emit_state();
    }

    /// Make `chat_id` the active conversation: swap the message feed, seed
    /// the cache with outstanding sends, and clear the viewer's unread count.
    pub(super) fn select_chat(&mut self, chat_id: &str, participants: Vec<String>) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        sess.index.select(Some(chat_id.to_string()));
        let already_open = sess.active.as_ref().is_some_and(|a| a.chat_id == chat_id);
        if !already_open {
            let mut cache = LocalMessageCache::new(chat_id);
            for entry in sess.outbox.for_conversation(chat_id) {
                cache.insert_local(entry.to_slot());
            }
            let peers: Vec<String> = participants
                .iter()
                .filter(|p| **p != sess.user_id)
                .cloned()
                .collect();
            sess.active = Some(ActiveChat {
                chat_id: chat_id.to_string(),
                participants,
                cache,
            });
            self.feeds.open(Topic::Messages {
                conversation_id: chat_id.to_string(),
            });
            self.request_profiles(peers);
        }

        self.unread_on_open(chat_id);
        self.sync_feed_status();
        self.refresh_chat_list();
        self.refresh_current_chat();
    }

    pub(super) fn close_chat(&mut self) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        sess.index.select(None);
        sess.active = None;
        self.feeds.close(FeedKind::Messages);

        self.sync_feed_status();
        self.refresh_chat_list();
        self.refresh_current_chat();
        self.emit_state();
    }

    pub(super) fn on_feed_delivered(&mut self, handle: FeedHandle, delivery: FeedDelivery) {
        if !self.feeds.admit(handle, delivery.is_snapshot()) {
            tracing::debug!(
                feed = handle.kind.label(),
                generation = handle.generation,
                "dropping stale feed event"
            );
            return;
        }
        match delivery {
            FeedDelivery::ChatList(event) => self.apply_chat_list_event(event),
            FeedDelivery::Messages(event) => self.apply_message_event(event),
        }
        self.sync_feed_status();
        self.emit_state();
    }

    fn apply_chat_list_event(&mut self, event: FeedEvent<Conversation>) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let auto_selected = sess.index.apply(event);
        let peers = sess.index.peers();
        let active_chat = sess.active.as_ref().map(|a| a.chat_id.clone());
        self.request_profiles(peers);

        if let Some(chat_id) = auto_selected {
            let participants = self
                .session
                .as_ref()
                .and_then(|s| s.participants_of(&chat_id))
                .unwrap_or_default();
            tracing::info!(%chat_id, "auto-selecting most recent chat");
            self.select_chat(&chat_id, participants);
            return;
        }

        // Messages keep arriving in the chat on screen; it stays read.
        if let Some(chat_id) = active_chat {
            let unread = self
                .session
                .as_ref()
                .map(|s| s.index.unread_for_viewer(&chat_id))
                .unwrap_or(0);
            if unread > 0 {
                self.unread_on_open(&chat_id);
            }
        }
        self.refresh_chat_list();
        self.refresh_current_chat();
    }

    fn apply_message_event(&mut self, event: FeedEvent<Message>) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let Some(active) = sess.active.as_mut() else {
            return;
        };
        let expected = Topic::Messages {
            conversation_id: active.chat_id.clone(),
        };
        if self.feeds.topic(FeedKind::Messages) != Some(&expected) {
            return;
        }
        active.cache.apply(event);
        self.refresh_current_chat();
    }

    pub(super) fn on_feed_interrupted(&mut self, handle: FeedHandle, error: RemoteError) {
        match self.feeds.on_interrupted(handle, &error) {
            Interruption::Stale => return,
            Interruption::Retrying { .. } => {}
            Interruption::GaveUp { attempts } => {
                let err = SyncError::Subscription {
                    feed: handle.kind.label(),
                    attempts,
                    source: error,
                };
                tracing::error!(%err, "giving up on feed");
                self.state.toast = Some(err.to_string());
            }
        }
        self.sync_feed_status();
        self.emit_state();
    }

    pub(super) fn on_resubscribe_due(&mut self, handle: FeedHandle) {
        if self.feeds.resubscribe(handle).is_some() {
            self.sync_feed_status();
            self.emit_state();
        }
    }

    /// Back in the foreground: revive feeds that ran out of attempts, retry
    /// failed profile lookups and relabel timestamps against the new "now".
    pub(super) fn foregrounded(&mut self) {
        if self.session.is_none() {
            return;
        }
        let restarted = self.feeds.restart_failed();
        if !restarted.is_empty() {
            tracing::info!(feeds = ?restarted, "restarting failed feeds");
        }
        self.retry_failed_profiles();
        self.sync_feed_status();
        self.refresh_all();
        self.emit_state();
    }

    pub(super) fn sync_feed_status(&mut self) {
        self.state.feeds = FeedStatus {
            chat_list: self.feeds.health(FeedKind::ChatList),
            messages: self.feeds.health(FeedKind::Messages),
        };
    }
}
