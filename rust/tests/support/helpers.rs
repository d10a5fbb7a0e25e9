#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chat_sync_core::memory::{InMemoryRemoteLog, InMemoryUserDirectory};
use chat_sync_core::model::{conversation_id_for, NewMessage};
use chat_sync_core::{
    AppAction, AppReconciler, AppState, AppUpdate, ChatApp, ChatMessage, FeedHealth, RemoteLog,
};
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Fast retry knobs so failure paths finish quickly.
pub fn write_config(data_dir: &str, overrides: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("chat_sync_config.json");
    let mut v = serde_json::json!({
        "send_max_attempts": 1,
        "send_retry_base_ms": 10,
        "resubscribe_max_attempts": 3,
        "resubscribe_base_ms": 20,
        "resubscribe_max_ms": 100,
    });
    if let (Some(base), Some(extra)) = (v.as_object_mut(), overrides.as_object()) {
        for (k, val) in extra {
            base.insert(k.clone(), val.clone());
        }
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

/// Append straight to the log as `from`, bypassing any client.
pub fn post(log: &InMemoryRemoteLog, from: &str, to: &str, text: &str) -> String {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    rt.block_on(log.append(NewMessage {
        conversation_id: conversation_id_for(from, to),
        participants: vec![from.to_string(), to.to_string()],
        sender_id: from.to_string(),
        text: text.to_string(),
        local_id: format!("direct-{text}"),
    }))
    .unwrap()
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<AppUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn states(&self) -> Vec<AppState> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|u| match u {
                AppUpdate::FullState(s) => s.clone(),
            })
            .collect()
    }

    pub fn last_toast(&self) -> Option<String> {
        self.states().into_iter().rev().find_map(|s| s.toast)
    }
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}

/// One signed-in device, backed by the shared in-memory log.
pub struct Client {
    pub app: Arc<ChatApp>,
    pub updates: Collector,
    _dir: TempDir,
}

impl Client {
    pub fn new(
        log: &InMemoryRemoteLog,
        directory: &InMemoryUserDirectory,
        config: serde_json::Value,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        write_config(&data_dir, config);
        let app = ChatApp::new(
            data_dir,
            Arc::new(log.clone()),
            Arc::new(directory.clone()),
        );
        let updates = Collector::new();
        app.listen_for_updates(Box::new(updates.clone()));
        Self {
            app,
            updates,
            _dir: dir,
        }
    }

    pub fn signed_in(
        log: &InMemoryRemoteLog,
        directory: &InMemoryUserDirectory,
        user_id: &str,
    ) -> Self {
        Self::signed_in_with(log, directory, user_id, serde_json::json!({}))
    }

    pub fn signed_in_with(
        log: &InMemoryRemoteLog,
        directory: &InMemoryUserDirectory,
        user_id: &str,
        config: serde_json::Value,
    ) -> Self {
        let client = Self::new(log, directory, config);
        client.dispatch(AppAction::SignIn {
            user_id: user_id.to_string(),
        });
        client.wait("chat list live", |s| s.feeds.chat_list == FeedHealth::Live);
        client
    }

    pub fn dispatch(&self, action: AppAction) {
        self.app.dispatch(action);
    }

    pub fn state(&self) -> AppState {
        self.app.state()
    }

    pub fn wait(&self, what: &str, mut f: impl FnMut(&AppState) -> bool) {
        wait_until(what, TIMEOUT, || f(&self.app.state()));
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state()
            .current_chat
            .map(|c| c.messages)
            .unwrap_or_default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }

    pub fn open_chat(&self, chat_id: &str) {
        self.dispatch(AppAction::OpenChat {
            chat_id: chat_id.to_string(),
        });
        self.wait("chat open", |s| {
            s.current_chat.as_ref().is_some_and(|c| c.chat_id == chat_id)
                && s.feeds.messages == FeedHealth::Live
        });
    }

    pub fn start_chat(&self, peer_id: &str) {
        self.dispatch(AppAction::StartChat {
            peer_id: peer_id.to_string(),
        });
        self.wait("draft chat open", |s| {
            s.current_chat.as_ref().is_some_and(|c| c.peer_id == peer_id)
                && s.feeds.messages == FeedHealth::Live
        });
    }

    pub fn send(&self, chat_id: &str, text: &str) {
        self.dispatch(AppAction::SendMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
    }
}
