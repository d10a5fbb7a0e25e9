#[derive(Debug, Clone)]
pub enum AppAction {
    // Session
    SignIn {
        user_id: String,
    },
    SignOut,

    // Chat
    OpenChat {
        chat_id: String,
    },
    StartChat {
        peer_id: String,
    },
    CloseChat,
    SendMessage {
        chat_id: String,
        text: String,
    },
    RetryMessage {
        chat_id: String,
        local_id: String,
    },
    SetChatFilter {
        query: String,
    },

    // Profiles
    ViewProfile {
        user_id: String,
    },
    CloseProfile,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message text).
    pub fn tag(&self) -> &'static str {
        match self {
            // Session
            AppAction::SignIn { .. } => "SignIn",
            AppAction::SignOut => "SignOut",

            // Chat
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::StartChat { .. } => "StartChat",
            AppAction::CloseChat => "CloseChat",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::SetChatFilter { .. } => "SetChatFilter",

            // Profiles
            AppAction::ViewProfile { .. } => "ViewProfile",
            AppAction::CloseProfile => "CloseProfile",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
