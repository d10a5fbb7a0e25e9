mod chat_index;
mod config;
mod message_cache;
mod outbox;
mod profiles;
mod session;
mod subscriptions;
pub(crate) mod unread;
mod view;

use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::error::{RemoteError, SyncError};
use crate::remote::{RemoteLog, UserDirectory};
use crate::state::{AuthState, ChatMessage, ChatViewState, FeedStatus, MessageDeliveryState};
use crate::updates::{AppUpdate, CoreMsg, FeedDelivery, InternalEvent};

use session::Session;
use subscriptions::SubscriptionManager;

pub(crate) use subscriptions::FeedHandle;

pub(crate) struct AppCore {
    pub(crate) state: crate::state::AppState,
    rev: u64,
    epoch: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<crate::state::AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    remote: Arc<dyn RemoteLog>,
    directory: Arc<dyn UserDirectory>,
    feeds: SubscriptionManager,

    session: Option<Session>,
}

impl AppCore {
    pub(crate) fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<crate::state::AppState>>,
        remote: Arc<dyn RemoteLog>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = crate::state::AppState::empty();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let feeds = SubscriptionManager::new(
            remote.clone(),
            core_sender.clone(),
            runtime.handle().clone(),
            config.resubscribe_retry(),
        );

        let this = Self {
            state,
            rev: 0,
            epoch: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            remote,
            directory,
            feeds,
            session: None,
        };

        // Ensure ChatApp::state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &crate::state::AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until the UI clears it, so a resync still shows it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it carries message text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::FeedOpened { handle, token } => self.feeds.on_opened(handle, token),
            InternalEvent::FeedDelivered { handle, delivery } => {
                self.on_feed_delivered(handle, delivery)
            }
            InternalEvent::FeedInterrupted { handle, error } => {
                self.on_feed_interrupted(handle, error)
            }
            InternalEvent::ResubscribeDue { handle } => self.on_resubscribe_due(handle),
            InternalEvent::AppendFinished {
                epoch,
                local_id,
                result,
            } => self.on_append_finished(epoch, local_id, result),
            InternalEvent::ProfileFetched {
                epoch,
                user_id,
                result,
            } => self.on_profile_fetched(epoch, user_id, result),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        // Everything except signing in needs a session.
        let needs_session = !matches!(action, AppAction::SignIn { .. } | AppAction::ClearToast);
        if needs_session && !self.is_signed_in() {
            if !matches!(action, AppAction::SignOut | AppAction::Foregrounded) {
                self.toast("Please sign in first");
            }
            return;
        }

        match action {
            // Session
            AppAction::SignIn { user_id } => self.start_session(&user_id),
            AppAction::SignOut => {
                self.stop_session();
                self.emit_state();
            }

            // Chat
            AppAction::OpenChat { chat_id } => self.open_chat(&chat_id),
            AppAction::StartChat { peer_id } => self.start_chat(&peer_id),
            AppAction::CloseChat => self.close_chat(),
            AppAction::SendMessage { chat_id, text } => self.send_message(&chat_id, &text),
            AppAction::RetryMessage { chat_id, local_id } => {
                self.retry_message(&chat_id, &local_id)
            }
            AppAction::SetChatFilter { query } => {
                if let Some(sess) = self.session.as_mut() {
                    sess.index.set_filter(&query);
                }
                self.refresh_chat_list();
                self.emit_state();
            }

            // Profiles
            AppAction::ViewProfile { user_id } => self.view_profile(&user_id),
            AppAction::CloseProfile => self.close_profile(),

            // UI
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }

            // Lifecycle
            AppAction::Foregrounded => self.foregrounded(),
        }
    }
}
