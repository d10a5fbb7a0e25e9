use serde::Serialize;

/// Read-only view published to the UI layer after every change.
#[derive(Clone, Debug, Serialize)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub my_profile: Option<ProfileView>,
    pub chat_list: Vec<ChatSummary>,
    pub chat_filter: String,
    pub selected_chat_id: Option<String>,
    pub current_chat: Option<ChatViewState>,
    pub peer_profile: Option<ProfileView>,
    pub feeds: FeedStatus,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::SignedOut,
            my_profile: None,
            chat_list: vec![],
            chat_filter: String::new(),
            selected_chat_id: None,
            current_chat: None,
            peer_profile: None,
            feeds: FeedStatus::idle(),
            toast: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AuthState {
    SignedOut,
    SignedIn { user_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileView {
    pub user_id: String,
    pub display_name: String,
    pub status: Option<String>,
    pub avatar_ref: Option<String>,
    pub phone: Option<String>,
    /// Why the last lookup failed; cleared once it resolves.
    pub lookup_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    pub chat_list: FeedHealth,
    pub messages: FeedHealth,
}

impl FeedStatus {
    pub fn idle() -> Self {
        Self {
            chat_list: FeedHealth::Idle,
            messages: FeedHealth::Idle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FeedHealth {
    Idle,
    Connecting,
    Live,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub peer_id: String,
    pub peer_name: String,
    pub peer_avatar_ref: Option<String>,
    pub last_message_preview: String,
    pub updated_at: i64,
    pub time_label: String,
    pub unread_count: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatViewState {
    pub chat_id: String,
    pub peer_id: String,
    pub peer_name: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Server id once confirmed, otherwise the local correlation id.
    pub id: String,
    pub local_id: Option<String>,
    pub sender_id: String,
    pub text: String,
    pub created_at: i64,
    pub time_label: String,
    pub is_mine: bool,
    pub delivery: MessageDeliveryState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Failed { reason: String },
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
