//! In-process remote log and user directory.
//!
//! Behaves like a server-ordered log: ids and timestamps are assigned on
//! append, timestamps are strictly increasing per log, and every subscription
//! starts with a snapshot. Used by integration tests and the demo CLI; the
//! fault-injection knobs simulate an unreliable network.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::core::unread;
use crate::error::{LookupError, RemoteError};
use crate::model::{Conversation, Message, NewMessage, UserProfile};
use crate::remote::{Change, Feed, FeedEvent, RemoteLog, UnsubscribeToken, UserDirectory};
use crate::state::now_millis;

type ChatListTx = UnboundedSender<Result<FeedEvent<Conversation>, RemoteError>>;
type MessagesTx = UnboundedSender<Result<FeedEvent<Message>, RemoteError>>;

enum Subscriber {
    ChatList { user_id: String, tx: ChatListTx },
    Messages { conversation_id: String, tx: MessagesTx },
}

#[derive(Default)]
struct LogState {
    conversations: BTreeMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscription: u64,
    next_message: u64,
    last_timestamp: i64,

    fail_appends: u32,
    fail_subscribes: u32,
    fail_unread_updates: u32,
    append_delay: Option<Duration>,
}

impl LogState {
    fn next_timestamp(&mut self) -> i64 {
        let now = now_millis();
        self.last_timestamp = if now > self.last_timestamp {
            now
        } else {
            self.last_timestamp + 1
        };
        self.last_timestamp
    }

    fn publish_conversation(
        &mut self,
        conversation: &Conversation,
        change: fn(Conversation) -> Change<Conversation>,
    ) {
        self.subscribers.retain(|_, sub| match sub {
            Subscriber::ChatList { user_id, tx } if conversation.includes(user_id) => tx
                .send(Ok(FeedEvent::Changes(vec![change(conversation.clone())])))
                .is_ok(),
            Subscriber::ChatList { tx, .. } => !tx.is_closed(),
            Subscriber::Messages { tx, .. } => !tx.is_closed(),
        });
    }

    fn publish_message(&mut self, message: &Message, change: fn(Message) -> Change<Message>) {
        self.subscribers.retain(|_, sub| match sub {
            Subscriber::Messages {
                conversation_id,
                tx,
            } if *conversation_id == message.conversation_id => tx
                .send(Ok(FeedEvent::Changes(vec![change(message.clone())])))
                .is_ok(),
            Subscriber::Messages { tx, .. } => !tx.is_closed(),
            Subscriber::ChatList { tx, .. } => !tx.is_closed(),
        });
    }

    fn take_unread_failure(&mut self) -> Result<(), RemoteError> {
        if self.fail_unread_updates > 0 {
            self.fail_unread_updates -= 1;
            return Err(RemoteError::Unavailable("unread update rejected".into()));
        }
        Ok(())
    }

    fn update_conversation(
        &mut self,
        conversation_id: &str,
        f: impl FnOnce(&mut Conversation),
    ) -> Result<(), RemoteError> {
        let Some(conversation) = self.conversations.get_mut(conversation_id) else {
            return Err(RemoteError::NotFound(conversation_id.to_string()));
        };
        f(conversation);
        let snapshot = conversation.clone();
        self.publish_conversation(&snapshot, Change::Modified);
        Ok(())
    }
}

/// Shared handle; clones observe the same log.
#[derive(Clone, Default)]
pub struct InMemoryRemoteLog {
    state: Arc<Mutex<LogState>>,
}

impl InMemoryRemoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().expect("remote log state poisoned")
    }

    /// The next `n` appends fail with [`RemoteError::Unavailable`].
    pub fn fail_next_appends(&self, n: u32) {
        self.lock().fail_appends = n;
    }

    /// The next `n` subscribe calls fail with [`RemoteError::Unavailable`].
    pub fn fail_next_subscribes(&self, n: u32) {
        self.lock().fail_subscribes = n;
    }

    /// The next `n` unread resets or increments fail with
    /// [`RemoteError::Unavailable`].
    pub fn fail_next_unread_updates(&self, n: u32) {
        self.lock().fail_unread_updates = n;
    }

    pub fn set_append_delay(&self, delay: Option<Duration>) {
        self.lock().append_delay = delay;
    }

    /// Cut every open feed, as a dropped connection would.
    pub fn disrupt_feeds(&self) {
        let mut st = self.lock();
        for (_, sub) in st.subscribers.drain() {
            match sub {
                Subscriber::ChatList { tx, .. } => {
                    let _ = tx.send(Err(RemoteError::Disconnected));
                }
                Subscriber::Messages { tx, .. } => {
                    let _ = tx.send(Err(RemoteError::Disconnected));
                }
            }
        }
    }

    pub fn open_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.lock().conversations.get(conversation_id).cloned()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.lock()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Edit a stored message and push `Modified` to its feeds.
    pub fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str) -> bool {
        let mut st = self.lock();
        let Some(stored) = st
            .messages
            .get_mut(conversation_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        stored.text = text.to_string();
        let updated = stored.clone();
        st.publish_message(&updated, Change::Modified);
        true
    }

    /// Delete a stored message and push `Removed` to its feeds.
    pub fn delete_message(&self, conversation_id: &str, message_id: &str) -> bool {
        let mut st = self.lock();
        let Some(list) = st.messages.get_mut(conversation_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| m.id != message_id);
        if list.len() == before {
            return false;
        }
        let id = message_id.to_string();
        st.subscribers.retain(|_, sub| match sub {
            Subscriber::Messages {
                conversation_id: c,
                tx,
            } if c.as_str() == conversation_id => tx
                .send(Ok(FeedEvent::Changes(vec![Change::Removed { id: id.clone() }])))
                .is_ok(),
            Subscriber::Messages { tx, .. } => !tx.is_closed(),
            Subscriber::ChatList { tx, .. } => !tx.is_closed(),
        });
        true
    }

    fn append_now(&self, new: NewMessage) -> Result<String, RemoteError> {
        let mut st = self.lock();
        if st.fail_appends > 0 {
            st.fail_appends -= 1;
            return Err(RemoteError::Unavailable("append rejected".into()));
        }
        if !new.participants.iter().any(|p| *p == new.sender_id) {
            return Err(RemoteError::Rejected(format!(
                "{} is not a participant of {}",
                new.sender_id, new.conversation_id
            )));
        }

        let created_at = st.next_timestamp();
        st.next_message += 1;
        let id = format!("m{:08}", st.next_message);
        let message = Message {
            id: id.clone(),
            conversation_id: new.conversation_id.clone(),
            sender_id: new.sender_id,
            text: new.text,
            created_at,
            local_id: Some(new.local_id),
        };

        let is_new = !st.conversations.contains_key(&new.conversation_id);
        let conversation = st
            .conversations
            .entry(new.conversation_id.clone())
            .or_insert_with(|| Conversation {
                id: new.conversation_id.clone(),
                participants: new.participants.clone(),
                last_message_preview: None,
                updated_at: created_at,
                unread_count: HashMap::new(),
            });
        conversation.last_message_preview = Some(message.text.clone());
        conversation.updated_at = created_at;
        let conversation = conversation.clone();

        st.messages
            .entry(new.conversation_id)
            .or_default()
            .push(message.clone());
        st.publish_message(&message, Change::Added);
        if is_new {
            st.publish_conversation(&conversation, Change::Added);
        } else {
            st.publish_conversation(&conversation, Change::Modified);
        }
        Ok(id)
    }
}

#[async_trait]
impl RemoteLog for InMemoryRemoteLog {
    async fn append(&self, message: NewMessage) -> Result<String, RemoteError> {
        let delay = self.lock().append_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.append_now(message)
    }

    async fn reset_unread(&self, conversation_id: &str, user_id: &str) -> Result<(), RemoteError> {
        let mut st = self.lock();
        st.take_unread_failure()?;
        if st
            .conversations
            .get(conversation_id)
            .is_some_and(|c| c.unread_for(user_id) == 0)
        {
            return Ok(());
        }
        st.update_conversation(conversation_id, |c| {
            unread::reset(&mut c.unread_count, user_id)
        })
    }

    async fn increment_unread(
        &self,
        conversation_id: &str,
        recipients: &[String],
    ) -> Result<(), RemoteError> {
        let mut st = self.lock();
        st.take_unread_failure()?;
        st.update_conversation(conversation_id, |c| {
            unread::accumulate(&mut c.unread_count, recipients)
        })
    }

    async fn subscribe_chat_list(&self, user_id: &str) -> Result<Feed<Conversation>, RemoteError> {
        let mut st = self.lock();
        if st.fail_subscribes > 0 {
            st.fail_subscribes -= 1;
            return Err(RemoteError::Unavailable("subscribe rejected".into()));
        }
        let (tx, events) = mpsc::unbounded_channel();
        let snapshot: Vec<Conversation> = st
            .conversations
            .values()
            .filter(|c| c.includes(user_id))
            .cloned()
            .collect();
        let _ = tx.send(Ok(FeedEvent::Snapshot(snapshot)));
        st.next_subscription += 1;
        let id = st.next_subscription;
        st.subscribers.insert(
            id,
            Subscriber::ChatList {
                user_id: user_id.to_string(),
                tx,
            },
        );
        Ok(Feed {
            token: UnsubscribeToken(id),
            events,
        })
    }

    async fn subscribe_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Feed<Message>, RemoteError> {
        let mut st = self.lock();
        if st.fail_subscribes > 0 {
            st.fail_subscribes -= 1;
            return Err(RemoteError::Unavailable("subscribe rejected".into()));
        }
        let (tx, events) = mpsc::unbounded_channel();
        let snapshot = st
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        let _ = tx.send(Ok(FeedEvent::Snapshot(snapshot)));
        st.next_subscription += 1;
        let id = st.next_subscription;
        st.subscribers.insert(
            id,
            Subscriber::Messages {
                conversation_id: conversation_id.to_string(),
                tx,
            },
        );
        Ok(Feed {
            token: UnsubscribeToken(id),
            events,
        })
    }

    fn unsubscribe(&self, token: UnsubscribeToken) {
        self.lock().subscribers.remove(&token.0);
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    profiles: Arc<Mutex<HashMap<String, UserProfile>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: UserProfile) {
        self.profiles
            .lock()
            .expect("directory poisoned")
            .insert(profile.id.clone(), profile);
    }

    /// Convenience for a profile with only a display name.
    pub fn insert_named(&self, id: &str, display_name: &str) {
        self.insert(UserProfile {
            id: id.to_string(),
            display_name: display_name.to_string(),
            status: None,
            avatar_ref: None,
            phone: None,
        });
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, user_id: &str) -> Result<UserProfile, LookupError> {
        self.profiles
            .lock()
            .expect("directory poisoned")
            .get(user_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(user_id.to_string()))
    }
}
