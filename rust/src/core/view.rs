// Derived view state: chat list rows and the open conversation.

use super::message_cache::MessageSlot;
use super::*;

impl AppCore {
    pub(super) fn refresh_all(&mut self) {
        self.refresh_profiles();
        self.refresh_chat_list();
        self.refresh_current_chat();
    }

    pub(super) fn refresh_chat_list(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            self.state.chat_list = vec![];
            self.state.selected_chat_id = None;
            return;
        };
        let list = sess
            .index
            .summaries(&sess.profiles, |ts| self.time_label(ts));
        let selected = sess.index.selected().map(str::to_string);
        let filter = sess.index.filter().to_string();

        self.state.chat_list = list;
        self.state.selected_chat_id = selected;
        self.state.chat_filter = filter;
    }

    pub(super) fn refresh_current_chat(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            self.state.current_chat = None;
            return;
        };
        let Some(active) = sess.active.as_ref() else {
            self.state.current_chat = None;
            return;
        };
        let me = sess.user_id.as_str();
        let peer_id = active
            .participants
            .iter()
            .find(|p| p.as_str() != me)
            .cloned()
            .unwrap_or_else(|| me.to_string());

        let messages = active
            .cache
            .slots()
            .iter()
            .map(|slot| {
                let (id, local_id, sender_id, text, created_at, delivery) = match slot {
                    MessageSlot::Confirmed(m) => (
                        m.id.clone(),
                        m.local_id.clone(),
                        m.sender_id.clone(),
                        m.text.clone(),
                        m.created_at,
                        MessageDeliveryState::Sent,
                    ),
                    MessageSlot::Pending(l) => (
                        l.local_id.clone(),
                        Some(l.local_id.clone()),
                        l.sender_id.clone(),
                        l.text.clone(),
                        l.created_at,
                        MessageDeliveryState::Pending,
                    ),
                    MessageSlot::Failed { message: l, reason } => (
                        l.local_id.clone(),
                        Some(l.local_id.clone()),
                        l.sender_id.clone(),
                        l.text.clone(),
                        l.created_at,
                        MessageDeliveryState::Failed {
                            reason: reason.clone(),
                        },
                    ),
                };
                ChatMessage {
                    is_mine: sender_id == me,
                    time_label: self.time_label(created_at),
                    id,
                    local_id,
                    sender_id,
                    text,
                    created_at,
                    delivery,
                }
            })
            .collect();

        let view = ChatViewState {
            chat_id: active.chat_id.clone(),
            peer_name: sess.profiles.display_name(&peer_id).to_string(),
            peer_id,
            messages,
        };
        self.state.current_chat = Some(view);
    }
}
