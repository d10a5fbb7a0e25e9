// The signed-in user's conversations, most recently active first.

use std::collections::HashMap;

use super::profiles::ProfileBook;
use crate::model::Conversation;
use crate::remote::{Change, FeedEvent};
use crate::state::ChatSummary;

pub(crate) const NO_MESSAGES_PREVIEW: &str = "No messages yet";

#[derive(Debug)]
pub(crate) struct ChatIndex {
    viewer_id: String,
    conversations: HashMap<String, Conversation>,
    selected: Option<String>,
    auto_selected: bool,
    filter: String,
}

impl ChatIndex {
    pub(crate) fn new(viewer_id: impl Into<String>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            conversations: HashMap::new(),
            selected: None,
            auto_selected: false,
            filter: String::new(),
        }
    }

    /// Apply a chat-list event. Returns the conversation that got selected
    /// automatically, if this event made the index non-empty for the first
    /// time while nothing was selected.
    pub(crate) fn apply(&mut self, event: FeedEvent<Conversation>) -> Option<String> {
        let was_empty = self.conversations.is_empty();
        match event {
            FeedEvent::Snapshot(list) => {
                self.conversations.clear();
                for c in list {
                    self.upsert(c);
                }
            }
            FeedEvent::Changes(changes) => {
                for change in changes {
                    match change {
                        Change::Added(c) | Change::Modified(c) => self.upsert(c),
                        Change::Removed { id } => {
                            self.conversations.remove(&id);
                        }
                    }
                }
            }
        }
        if was_empty && !self.conversations.is_empty() {
            self.auto_select()
        } else {
            None
        }
    }

    fn upsert(&mut self, conversation: Conversation) {
        if !conversation.is_well_formed() || !conversation.includes(&self.viewer_id) {
            tracing::warn!(chat_id = %conversation.id, "skipping malformed conversation");
            return;
        }
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    fn auto_select(&mut self) -> Option<String> {
        if self.auto_selected || self.selected.is_some() {
            return None;
        }
        let id = self.ordered().first()?.id.clone();
        self.selected = Some(id.clone());
        self.auto_selected = true;
        Some(id)
    }

    pub(crate) fn select(&mut self, chat_id: Option<String>) {
        self.selected = chat_id;
    }

    pub(crate) fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub(crate) fn get(&self, chat_id: &str) -> Option<&Conversation> {
        self.conversations.get(chat_id)
    }

    pub(crate) fn contains(&self, chat_id: &str) -> bool {
        self.conversations.contains_key(chat_id)
    }

    pub(crate) fn unread_for_viewer(&self, chat_id: &str) -> u32 {
        self.get(chat_id)
            .map(|c| c.unread_for(&self.viewer_id))
            .unwrap_or(0)
    }

    /// Optimistically zero `user_id`'s counter until the feed catches up.
    pub(crate) fn clear_unread(&mut self, chat_id: &str, user_id: &str) {
        if let Some(c) = self.conversations.get_mut(chat_id) {
            crate::core::unread::reset(&mut c.unread_count, user_id);
        }
    }

    pub(crate) fn set_filter(&mut self, query: &str) {
        self.filter = query.trim().to_string();
    }

    pub(crate) fn filter(&self) -> &str {
        &self.filter
    }

    /// Peers of every indexed conversation.
    pub(crate) fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .conversations
            .values()
            .filter_map(|c| c.peer_of(&self.viewer_id))
            .map(str::to_string)
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }

    /// `updated_at` descending, ties broken by id ascending.
    pub(crate) fn ordered(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().collect();
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    /// Display rows, filtered by the current query against peer name and
    /// preview.
    pub(crate) fn summaries(
        &self,
        profiles: &ProfileBook,
        label: impl Fn(i64) -> String,
    ) -> Vec<ChatSummary> {
        let needle = self.filter.to_lowercase();
        self.ordered()
            .into_iter()
            .filter_map(|c| {
                let peer_id = c.peer_of(&self.viewer_id)?.to_string();
                let peer_name = profiles.display_name(&peer_id).to_string();
                let preview = c
                    .last_message_preview
                    .clone()
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| NO_MESSAGES_PREVIEW.to_string());
                if !needle.is_empty()
                    && !peer_name.to_lowercase().contains(&needle)
                    && !preview.to_lowercase().contains(&needle)
                {
                    return None;
                }
                Some(ChatSummary {
                    chat_id: c.id.clone(),
                    peer_avatar_ref: profiles.avatar_ref(&peer_id).map(str::to_string),
                    peer_id,
                    peer_name,
                    last_message_preview: preview,
                    updated_at: c.updated_at,
                    time_label: label(c.updated_at),
                    unread_count: c.unread_for(&self.viewer_id),
                })
            })
            .collect()
    }
}
