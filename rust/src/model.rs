//! Records exchanged with the remote log and the user directory.
//!
//! These are the authoritative shapes. View types derived from them for the UI
//! live in [`crate::state`].

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Profile owned by the user directory. Read-only to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub status: Option<String>,
    pub avatar_ref: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    pub last_message_preview: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
    #[serde(default)]
    pub unread_count: HashMap<String, u32>,
}

impl Conversation {
    /// Exactly two distinct participants.
    pub fn is_well_formed(&self) -> bool {
        self.participants.len() == 2 && self.participants[0] != self.participants[1]
    }

    pub fn includes(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `me`.
    pub fn peer_of(&self, me: &str) -> Option<&str> {
        if !self.includes(me) {
            return None;
        }
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != me)
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread_count.get(user_id).copied().unwrap_or(0)
    }
}

/// Deterministic conversation id for a pair of users.
pub fn conversation_id_for(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned.
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    /// Server-assigned, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Client correlation token of the send that produced this record.
    #[serde(default)]
    pub local_id: Option<String>,
}

impl Message {
    pub fn order_key(&self) -> (i64, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// Total order of a conversation: `(created_at, id)` ascending.
pub fn cmp_order(a: (i64, &str), b: (i64, &str)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

/// Append request. `created_at` and `id` are assigned by the remote log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    /// Used by the remote log to create the conversation lazily.
    pub participants: Vec<String>,
    pub sender_id: String,
    pub text: String,
    pub local_id: String,
}
