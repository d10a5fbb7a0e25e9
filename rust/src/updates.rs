use crate::core::FeedHandle;
use crate::error::{LookupError, RemoteError};
use crate::model::{Conversation, Message, UserProfile};
use crate::remote::{FeedEvent, UnsubscribeToken};
use crate::state::AppState;
use crate::AppAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    /// Every change publishes a full snapshot; `rev` is strictly increasing.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub(crate) enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub(crate) enum FeedDelivery {
    ChatList(FeedEvent<Conversation>),
    Messages(FeedEvent<Message>),
}

impl FeedDelivery {
    pub(crate) fn is_snapshot(&self) -> bool {
        match self {
            FeedDelivery::ChatList(ev) => ev.is_snapshot(),
            FeedDelivery::Messages(ev) => ev.is_snapshot(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum InternalEvent {
    // Feed plumbing. Every event carries the handle of the feed that produced it.
    FeedOpened {
        handle: FeedHandle,
        token: UnsubscribeToken,
    },
    FeedDelivered {
        handle: FeedHandle,
        delivery: FeedDelivery,
    },
    FeedInterrupted {
        handle: FeedHandle,
        error: RemoteError,
    },
    ResubscribeDue {
        handle: FeedHandle,
    },

    // Async results, tagged with the session epoch that issued them.
    AppendFinished {
        epoch: u64,
        local_id: String,
        result: Result<String, RemoteError>,
    },
    ProfileFetched {
        epoch: u64,
        user_id: String,
        result: Result<UserProfile, LookupError>,
    },
}
