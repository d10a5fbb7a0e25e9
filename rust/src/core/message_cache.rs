// Ordered message sequence for the open conversation.
//
// Invariant: `slots` is sorted by (created_at, id) at all times, where a local
// slot uses its placeholder timestamp and local id. A send is visible as
// exactly one slot: local until its confirmed record arrives, confirmed after.

use std::collections::HashSet;

use crate::model::{cmp_order, Message};
use crate::remote::{Change, FeedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalMessage {
    pub(crate) local_id: String,
    pub(crate) sender_id: String,
    pub(crate) text: String,
    /// Client clock placeholder until the log assigns the real one.
    pub(crate) created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MessageSlot {
    Pending(LocalMessage),
    Confirmed(Message),
    Failed {
        message: LocalMessage,
        reason: String,
    },
}

impl MessageSlot {
    pub(crate) fn order_key(&self) -> (i64, &str) {
        match self {
            MessageSlot::Confirmed(m) => m.order_key(),
            MessageSlot::Pending(l) | MessageSlot::Failed { message: l, .. } => {
                (l.created_at, l.local_id.as_str())
            }
        }
    }

    /// Correlation id, for local slots and for confirmed records that came
    /// from one of our sends.
    pub(crate) fn local_id(&self) -> Option<&str> {
        match self {
            MessageSlot::Confirmed(m) => m.local_id.as_deref(),
            MessageSlot::Pending(l) | MessageSlot::Failed { message: l, .. } => {
                Some(l.local_id.as_str())
            }
        }
    }

    pub(crate) fn server_id(&self) -> Option<&str> {
        match self {
            MessageSlot::Confirmed(m) => Some(m.id.as_str()),
            _ => None,
        }
    }

    pub(crate) fn is_local(&self) -> bool {
        !matches!(self, MessageSlot::Confirmed(_))
    }
}

/// Swap in a confirmed record: drop the local slot with the same correlation
/// id and any older copy of the record, then insert it at its sorted position.
/// Everything else keeps its relative order.
pub(crate) fn reconcile(mut entries: Vec<MessageSlot>, confirmed: Message) -> Vec<MessageSlot> {
    entries.retain(|slot| match slot {
        MessageSlot::Confirmed(m) => m.id != confirmed.id,
        local => local.local_id().is_none() || local.local_id() != confirmed.local_id.as_deref(),
    });
    let key = confirmed.order_key();
    let pos = entries.partition_point(|slot| cmp_order(slot.order_key(), key).is_lt());
    entries.insert(pos, MessageSlot::Confirmed(confirmed));
    entries
}

#[derive(Debug)]
pub(crate) struct LocalMessageCache {
    conversation_id: String,
    slots: Vec<MessageSlot>,
}

impl LocalMessageCache {
    pub(crate) fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            slots: Vec::new(),
        }
    }

    pub(crate) fn slots(&self) -> &[MessageSlot] {
        &self.slots
    }

    /// Newest timestamp on screen, confirmed or placeholder.
    pub(crate) fn latest_created_at(&self) -> Option<i64> {
        self.slots.last().map(|s| s.order_key().0)
    }

    pub(crate) fn apply(&mut self, event: FeedEvent<Message>) {
        match event {
            FeedEvent::Snapshot(records) => self.apply_snapshot(records),
            FeedEvent::Changes(changes) => {
                for change in changes {
                    match change {
                        Change::Added(m) => self.apply_added(m),
                        Change::Modified(m) => self.apply_modified(m),
                        Change::Removed { id } => self.apply_removed(&id),
                    }
                }
            }
        }
    }

    /// Replace every confirmed record. Local slots survive unless the
    /// snapshot already carries their confirmed counterpart.
    pub(crate) fn apply_snapshot(&mut self, records: Vec<Message>) {
        let confirmed_locals: HashSet<&str> =
            records.iter().filter_map(|m| m.local_id.as_deref()).collect();
        let locals: Vec<MessageSlot> = self
            .slots
            .drain(..)
            .filter(|slot| {
                slot.is_local()
                    && !slot
                        .local_id()
                        .is_some_and(|id| confirmed_locals.contains(id))
            })
            .collect();

        let mut seen = HashSet::new();
        let mut slots: Vec<MessageSlot> = records
            .into_iter()
            .filter(|m| m.conversation_id == self.conversation_id)
            .filter(|m| seen.insert(m.id.clone()))
            .map(MessageSlot::Confirmed)
            .collect();
        slots.extend(locals);
        slots.sort_by(|a, b| cmp_order(a.order_key(), b.order_key()));
        self.slots = slots;
    }

    /// Idempotent: a record whose id is already present is ignored.
    pub(crate) fn apply_added(&mut self, record: Message) {
        if record.conversation_id != self.conversation_id || self.contains_server_id(&record.id) {
            return;
        }
        self.slots = reconcile(std::mem::take(&mut self.slots), record);
    }

    /// Replace by id; repositions only if the ordering key changed.
    pub(crate) fn apply_modified(&mut self, record: Message) {
        if record.conversation_id != self.conversation_id {
            return;
        }
        if let Some(pos) = self.position_of_server_id(&record.id) {
            if self.slots[pos].order_key() == record.order_key() {
                self.slots[pos] = MessageSlot::Confirmed(record);
                return;
            }
        }
        self.slots = reconcile(std::mem::take(&mut self.slots), record);
    }

    pub(crate) fn apply_removed(&mut self, id: &str) {
        self.slots.retain(|slot| slot.server_id() != Some(id));
    }

    /// Show a not-yet-confirmed send. No-op if the send is already visible in
    /// any form.
    pub(crate) fn insert_local(&mut self, slot: MessageSlot) {
        debug_assert!(slot.is_local());
        let Some(local_id) = slot.local_id() else {
            return;
        };
        if self.slots.iter().any(|s| s.local_id() == Some(local_id)) {
            return;
        }
        let pos = self
            .slots
            .partition_point(|s| cmp_order(s.order_key(), slot.order_key()).is_lt());
        self.slots.insert(pos, slot);
    }

    pub(crate) fn mark_failed(&mut self, local_id: &str, reason: &str) -> bool {
        let Some(slot) = self.local_slot_mut(local_id) else {
            return false;
        };
        let message = match slot {
            MessageSlot::Pending(l) | MessageSlot::Failed { message: l, .. } => l.clone(),
            MessageSlot::Confirmed(_) => return false,
        };
        *slot = MessageSlot::Failed {
            message,
            reason: reason.to_string(),
        };
        true
    }

    pub(crate) fn mark_pending(&mut self, local_id: &str) -> bool {
        let Some(slot) = self.local_slot_mut(local_id) else {
            return false;
        };
        let MessageSlot::Failed { message, .. } = slot else {
            return false;
        };
        let message = message.clone();
        *slot = MessageSlot::Pending(message);
        true
    }

    fn local_slot_mut(&mut self, local_id: &str) -> Option<&mut MessageSlot> {
        self.slots
            .iter_mut()
            .find(|s| s.is_local() && s.local_id() == Some(local_id))
    }

    fn position_of_server_id(&self, id: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.server_id() == Some(id))
    }

    fn contains_server_id(&self, id: &str) -> bool {
        self.position_of_server_id(id).is_some()
    }
}
