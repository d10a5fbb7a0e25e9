// Optimistic send queue. Sends go out one at a time in submission order; an
// entry leaves the queue once the log accepts it, while its pending slot in
// the message cache waits for the feed to deliver the confirmed record.

use std::collections::VecDeque;

use super::message_cache::{LocalMessage, MessageSlot};
use super::*;
use crate::error::ValidationError;
use crate::model::NewMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutboxState {
    Queued,
    InFlight,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub(crate) struct OutboxEntry {
    pub(crate) local_id: String,
    pub(crate) conversation_id: String,
    pub(crate) participants: Vec<String>,
    pub(crate) sender_id: String,
    pub(crate) text: String,
    pub(crate) created_at: i64,
    pub(crate) state: OutboxState,
}

impl OutboxEntry {
    pub(crate) fn to_slot(&self) -> MessageSlot {
        let message = LocalMessage {
            local_id: self.local_id.clone(),
            sender_id: self.sender_id.clone(),
            text: self.text.clone(),
            created_at: self.created_at,
        };
        match &self.state {
            OutboxState::Failed { reason } => MessageSlot::Failed {
                message,
                reason: reason.clone(),
            },
            OutboxState::Queued | OutboxState::InFlight => MessageSlot::Pending(message),
        }
    }

    pub(crate) fn to_new_message(&self) -> NewMessage {
        NewMessage {
            conversation_id: self.conversation_id.clone(),
            participants: self.participants.clone(),
            sender_id: self.sender_id.clone(),
            text: self.text.clone(),
            local_id: self.local_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    entries: VecDeque<OutboxEntry>,
    last_placeholder_ts: i64,
}

impl SendQueue {
    /// Trim and validate `text`, then queue it with a fresh local id and a
    /// placeholder timestamp later than every earlier placeholder and than
    /// `latest_visible`, the newest timestamp already shown in the
    /// conversation. A clock running behind the log's never sorts a new send
    /// above older ones.
    pub(crate) fn enqueue(
        &mut self,
        conversation_id: &str,
        participants: &[String],
        sender_id: &str,
        text: &str,
        now_ms: i64,
        latest_visible: Option<i64>,
    ) -> Result<OutboxEntry, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let floor = self
            .last_placeholder_ts
            .max(latest_visible.unwrap_or(i64::MIN))
            .saturating_add(1);
        let created_at = now_ms.max(floor);
        self.last_placeholder_ts = created_at;

        let entry = OutboxEntry {
            local_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            participants: participants.to_vec(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            created_at,
            state: OutboxState::Queued,
        };
        self.entries.push_back(entry.clone());
        Ok(entry)
    }

    /// Promote the oldest queued entry, unless something is already in flight.
    pub(crate) fn start_next(&mut self) -> Option<OutboxEntry> {
        if self.in_flight().is_some() {
            return None;
        }
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.state == OutboxState::Queued)?;
        entry.state = OutboxState::InFlight;
        Some(entry.clone())
    }

    pub(crate) fn in_flight(&self) -> Option<&OutboxEntry> {
        self.entries.iter().find(|e| e.state == OutboxState::InFlight)
    }

    /// The log accepted the send.
    pub(crate) fn complete(&mut self, local_id: &str) -> Option<OutboxEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.local_id == local_id && e.state == OutboxState::InFlight)?;
        self.entries.remove(pos)
    }

    pub(crate) fn fail(&mut self, local_id: &str, reason: &str) -> Option<&OutboxEntry> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.local_id == local_id && e.state == OutboxState::InFlight)?;
        entry.state = OutboxState::Failed {
            reason: reason.to_string(),
        };
        Some(entry)
    }

    /// Re-queue a failed send. It keeps its local id and placeholder, so it
    /// stays where it was in the conversation.
    pub(crate) fn retry(&mut self, conversation_id: &str, local_id: &str) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| {
            e.conversation_id == conversation_id
                && e.local_id == local_id
                && matches!(e.state, OutboxState::Failed { .. })
        }) else {
            return false;
        };
        entry.state = OutboxState::Queued;
        true
    }

    pub(crate) fn for_conversation<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> impl Iterator<Item = &'a OutboxEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.conversation_id == conversation_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl AppCore {
    pub(super) fn send_message(&mut self, chat_id: &str, text: &str) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let Some(participants) = sess.participants_of(chat_id) else {
            self.toast("Chat not found");
            return;
        };
        let latest_visible = sess.latest_visible(chat_id);
        let entry = match sess.outbox.enqueue(
            chat_id,
            &participants,
            &sess.user_id,
            text,
            crate::state::now_millis(),
            latest_visible,
        ) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(chat_id, %e, "send ignored");
                return;
            }
        };
        if let Some(active) = sess.active_for_mut(chat_id) {
            active.cache.insert_local(entry.to_slot());
        }
        tracing::debug!(chat_id, local_id = %entry.local_id, "send queued");

        self.pump_outbox();
        self.refresh_current_chat();
        self.emit_state();
    }

    pub(super) fn retry_message(&mut self, chat_id: &str, local_id: &str) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if !sess.outbox.retry(chat_id, local_id) {
            self.toast("Nothing to retry");
            return;
        }
        if let Some(active) = sess.active_for_mut(chat_id) {
            active.cache.mark_pending(local_id);
        }

        self.pump_outbox();
        self.refresh_current_chat();
        self.emit_state();
    }

    /// Start the next append if the queue is idle. Transient failures are
    /// retried in place with backoff before the send is reported failed.
    pub(super) fn pump_outbox(&mut self) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let Some(entry) = sess.outbox.start_next() else {
            return;
        };
        let epoch = sess.epoch;
        let remote = self.remote.clone();
        let tx = self.core_sender.clone();
        let policy = self.config.send_retry();
        let local_id = entry.local_id.clone();
        let request = entry.to_new_message();

        self.runtime.spawn(async move {
            let result = policy
                .run("append", || remote.append(request.clone()))
                .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::AppendFinished {
                epoch,
                local_id,
                result,
            })));
        });
    }

    pub(super) fn on_append_finished(
        &mut self,
        epoch: u64,
        local_id: String,
        result: Result<String, RemoteError>,
    ) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if sess.epoch != epoch {
            return;
        }
        match result {
            Ok(message_id) => {
                let Some(entry) = sess.outbox.complete(&local_id) else {
                    return;
                };
                tracing::debug!(%local_id, %message_id, "append accepted");
                self.unread_on_confirmed_send(&entry.conversation_id, &entry.participants);
            }
            Err(e) => {
                let reason = SyncError::Send(e).to_string();
                tracing::warn!(%local_id, %reason, "send failed");
                let Some(entry) = sess.outbox.fail(&local_id, &reason) else {
                    return;
                };
                let chat_id = entry.conversation_id.clone();
                if let Some(active) = sess.active_for_mut(&chat_id) {
                    active.cache.mark_failed(&local_id, &reason);
                }
            }
        }

        self.pump_outbox();
        self.refresh_current_chat();
        self.emit_state();
    }
}
