// Live feed lifecycle. At most one chat-list feed and one message feed are
// open. Each (re)open gets a fresh handle; events from any other handle are
// stale and dropped, as are diffs that arrive before a feed's first snapshot.

use std::sync::Arc;

use flume::Sender;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::config::RetryPolicy;
use crate::error::RemoteError;
use crate::remote::{Feed, FeedEvent, RemoteLog, UnsubscribeToken};
use crate::state::FeedHealth;
use crate::updates::{CoreMsg, FeedDelivery, InternalEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FeedKind {
    ChatList,
    Messages,
}

impl FeedKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            FeedKind::ChatList => "chat list",
            FeedKind::Messages => "messages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FeedHandle {
    pub(crate) kind: FeedKind,
    pub(crate) generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Topic {
    ChatList { user_id: String },
    Messages { conversation_id: String },
}

impl Topic {
    fn kind(&self) -> FeedKind {
        match self {
            Topic::ChatList { .. } => FeedKind::ChatList,
            Topic::Messages { .. } => FeedKind::Messages,
        }
    }
}

struct FeedSlot {
    topic: Topic,
    handle: FeedHandle,
    task: Option<JoinHandle<()>>,
    token: Option<UnsubscribeToken>,
    awaiting_snapshot: bool,
    attempts: u32,
    health: FeedHealth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Interruption {
    /// Not the current feed any more.
    Stale,
    Retrying { attempt: u32 },
    GaveUp { attempts: u32 },
}

pub(crate) struct SubscriptionManager {
    remote: Arc<dyn RemoteLog>,
    core_sender: Sender<CoreMsg>,
    runtime: Handle,
    policy: RetryPolicy,
    next_generation: u64,
    chat_list: Option<FeedSlot>,
    messages: Option<FeedSlot>,
}

impl SubscriptionManager {
    pub(crate) fn new(
        remote: Arc<dyn RemoteLog>,
        core_sender: Sender<CoreMsg>,
        runtime: Handle,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            core_sender,
            runtime,
            policy,
            next_generation: 0,
            chat_list: None,
            messages: None,
        }
    }

    fn slot(&self, kind: FeedKind) -> Option<&FeedSlot> {
        match kind {
            FeedKind::ChatList => self.chat_list.as_ref(),
            FeedKind::Messages => self.messages.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: FeedKind) -> &mut Option<FeedSlot> {
        match kind {
            FeedKind::ChatList => &mut self.chat_list,
            FeedKind::Messages => &mut self.messages,
        }
    }

    /// The slot for `handle`, only if `handle` is its current generation.
    fn live_slot_mut(&mut self, handle: FeedHandle) -> Option<&mut FeedSlot> {
        self.slot_mut(handle.kind)
            .as_mut()
            .filter(|s| s.handle == handle)
    }

    fn next_handle(&mut self, kind: FeedKind) -> FeedHandle {
        self.next_generation += 1;
        FeedHandle {
            kind,
            generation: self.next_generation,
        }
    }

    pub(crate) fn topic(&self, kind: FeedKind) -> Option<&Topic> {
        self.slot(kind).map(|s| &s.topic)
    }

    pub(crate) fn health(&self, kind: FeedKind) -> FeedHealth {
        self.slot(kind)
            .map(|s| s.health.clone())
            .unwrap_or(FeedHealth::Idle)
    }

    /// Open `topic`, replacing whatever feed of the same kind was open.
    pub(crate) fn open(&mut self, topic: Topic) -> FeedHandle {
        let kind = topic.kind();
        if let Some(prev) = self.slot_mut(kind).take() {
            self.teardown(prev);
        }
        let handle = self.next_handle(kind);
        let task = self.spawn_feed(handle, topic.clone());
        tracing::debug!(feed = kind.label(), generation = handle.generation, "feed opening");
        *self.slot_mut(kind) = Some(FeedSlot {
            topic,
            handle,
            task: Some(task),
            token: None,
            awaiting_snapshot: true,
            attempts: 0,
            health: FeedHealth::Connecting,
        });
        handle
    }

    pub(crate) fn close(&mut self, kind: FeedKind) {
        if let Some(slot) = self.slot_mut(kind).take() {
            tracing::debug!(feed = kind.label(), generation = slot.handle.generation, "feed closed");
            self.teardown(slot);
        }
    }

    pub(crate) fn close_all(&mut self) {
        self.close(FeedKind::ChatList);
        self.close(FeedKind::Messages);
    }

    fn teardown(&self, slot: FeedSlot) {
        if let Some(task) = slot.task {
            task.abort();
        }
        if let Some(token) = slot.token {
            self.remote.unsubscribe(token);
        }
    }

    /// The remote acknowledged the subscription behind `handle`.
    pub(crate) fn on_opened(&mut self, handle: FeedHandle, token: UnsubscribeToken) {
        match self.live_slot_mut(handle) {
            Some(slot) => slot.token = Some(token),
            // Closed while the subscribe call was in flight.
            None => self.remote.unsubscribe(token),
        }
    }

    /// Whether an event from `handle` should be applied. The first accepted
    /// event of every generation is its snapshot.
    pub(crate) fn admit(&mut self, handle: FeedHandle, is_snapshot: bool) -> bool {
        let Some(slot) = self.live_slot_mut(handle) else {
            return false;
        };
        if slot.awaiting_snapshot {
            if !is_snapshot {
                return false;
            }
            slot.awaiting_snapshot = false;
            slot.attempts = 0;
            slot.health = FeedHealth::Live;
        }
        true
    }

    /// The feed behind `handle` failed or ended. Schedules a reopen with
    /// backoff while attempts remain.
    pub(crate) fn on_interrupted(&mut self, handle: FeedHandle, error: &RemoteError) -> Interruption {
        let policy = self.policy;
        let remote = self.remote.clone();
        let Some(slot) = self.live_slot_mut(handle) else {
            return Interruption::Stale;
        };
        if let Some(token) = slot.token.take() {
            remote.unsubscribe(token);
        }
        slot.task = None;
        slot.attempts += 1;
        let attempt = slot.attempts;

        if attempt > policy.max_attempts {
            slot.health = FeedHealth::Failed {
                reason: error.to_string(),
            };
            return Interruption::GaveUp {
                attempts: attempt - 1,
            };
        }
        slot.health = FeedHealth::Reconnecting { attempt };

        let delay = policy.delay_for(attempt);
        let tx = self.core_sender.clone();
        tracing::info!(feed = handle.kind.label(), attempt, ?delay, %error, "feed interrupted, resubscribing");
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ResubscribeDue {
                handle,
            })));
        });
        Interruption::Retrying { attempt }
    }

    /// Reopen the same topic under a new handle, if `handle` is still the
    /// one waiting to reconnect.
    pub(crate) fn resubscribe(&mut self, handle: FeedHandle) -> Option<FeedHandle> {
        let slot = self.live_slot_mut(handle)?;
        if !matches!(slot.health, FeedHealth::Reconnecting { .. }) {
            return None;
        }
        let topic = slot.topic.clone();
        Some(self.restart(handle.kind, topic))
    }

    /// Give every failed feed a fresh budget of attempts.
    pub(crate) fn restart_failed(&mut self) -> Vec<FeedKind> {
        let mut restarted = Vec::new();
        for kind in [FeedKind::ChatList, FeedKind::Messages] {
            let Some(slot) = self.slot_mut(kind).as_mut() else {
                continue;
            };
            if !matches!(slot.health, FeedHealth::Failed { .. }) {
                continue;
            }
            slot.attempts = 0;
            let topic = slot.topic.clone();
            self.restart(kind, topic);
            restarted.push(kind);
        }
        restarted
    }

    fn restart(&mut self, kind: FeedKind, topic: Topic) -> FeedHandle {
        let handle = self.next_handle(kind);
        let task = self.spawn_feed(handle, topic);
        if let Some(slot) = self.slot_mut(kind).as_mut() {
            if let Some(old) = slot.task.replace(task) {
                old.abort();
            }
            slot.handle = handle;
            slot.awaiting_snapshot = true;
            if !matches!(slot.health, FeedHealth::Reconnecting { .. }) {
                slot.health = FeedHealth::Connecting;
            }
        }
        handle
    }

    fn spawn_feed(&self, handle: FeedHandle, topic: Topic) -> JoinHandle<()> {
        let remote = self.remote.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            match topic {
                Topic::ChatList { user_id } => {
                    let feed = remote.subscribe_chat_list(&user_id).await;
                    pump(handle, feed, tx, FeedDelivery::ChatList).await;
                }
                Topic::Messages { conversation_id } => {
                    let feed = remote.subscribe_messages(&conversation_id).await;
                    pump(handle, feed, tx, FeedDelivery::Messages).await;
                }
            }
        })
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn internal(event: InternalEvent) -> CoreMsg {
    CoreMsg::Internal(Box::new(event))
}

/// Forward one feed into the actor until it errors or ends.
async fn pump<T: Send + 'static>(
    handle: FeedHandle,
    feed: Result<Feed<T>, RemoteError>,
    tx: Sender<CoreMsg>,
    wrap: fn(FeedEvent<T>) -> FeedDelivery,
) {
    let Feed { token, mut events } = match feed {
        Ok(feed) => feed,
        Err(error) => {
            let _ = tx.send(internal(InternalEvent::FeedInterrupted { handle, error }));
            return;
        }
    };
    if tx
        .send(internal(InternalEvent::FeedOpened { handle, token }))
        .is_err()
    {
        return;
    }
    let error = loop {
        match events.recv().await {
            Some(Ok(event)) => {
                let delivery = wrap(event);
                if tx
                    .send(internal(InternalEvent::FeedDelivered { handle, delivery }))
                    .is_err()
                {
                    return;
                }
            }
            Some(Err(e)) => break e,
            None => break RemoteError::Disconnected,
        }
    };
    let _ = tx.send(internal(InternalEvent::FeedInterrupted { handle, error }));
}
