//! Collaborator seams: the remote log and the user directory.
//!
//! A subscription is a [`Feed`]: an unsubscribe token plus a stream of events.
//! Every feed starts with a [`FeedEvent::Snapshot`] followed by ordered
//! [`FeedEvent::Changes`]. An `Err` item or the end of the stream means the feed
//! was disrupted; the engine reopens it.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::{LookupError, RemoteError};
use crate::model::{Conversation, Message, NewMessage, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnsubscribeToken(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    Added(T),
    Modified(T),
    Removed { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent<T> {
    Snapshot(Vec<T>),
    Changes(Vec<Change<T>>),
}

impl<T> FeedEvent<T> {
    pub fn is_snapshot(&self) -> bool {
        matches!(self, FeedEvent::Snapshot(_))
    }
}

pub struct Feed<T> {
    pub token: UnsubscribeToken,
    pub events: UnboundedReceiver<Result<FeedEvent<T>, RemoteError>>,
}

#[async_trait]
pub trait RemoteLog: Send + Sync + 'static {
    /// Append a message; the log assigns `id` and `created_at` and creates the
    /// conversation on first use. Returns the assigned id.
    async fn append(&self, message: NewMessage) -> Result<String, RemoteError>;

    async fn reset_unread(&self, conversation_id: &str, user_id: &str) -> Result<(), RemoteError>;

    /// Add one unseen message for each of `recipients`.
    async fn increment_unread(
        &self,
        conversation_id: &str,
        recipients: &[String],
    ) -> Result<(), RemoteError>;

    /// Conversations `user_id` participates in.
    async fn subscribe_chat_list(&self, user_id: &str) -> Result<Feed<Conversation>, RemoteError>;

    async fn subscribe_messages(&self, conversation_id: &str)
        -> Result<Feed<Message>, RemoteError>;

    /// Drop a subscription. Unknown tokens are ignored.
    fn unsubscribe(&self, token: UnsubscribeToken);
}

#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn get(&self, user_id: &str) -> Result<UserProfile, LookupError>;
}
