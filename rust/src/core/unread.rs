// Unread bookkeeping. The counter map itself is authoritative in the remote
// log; the engine only issues "opened" and "confirmed send".

use std::collections::HashMap;

use super::*;

/// Participants whose counter a confirmed send from `sender_id` bumps.
pub(crate) fn recipients(participants: &[String], sender_id: &str) -> Vec<String> {
    participants
        .iter()
        .filter(|p| p.as_str() != sender_id)
        .cloned()
        .collect()
}

/// +1 for every recipient on top of whatever is already unseen.
pub(crate) fn accumulate(counts: &mut HashMap<String, u32>, recipients: &[String]) {
    for r in recipients {
        let n = counts.entry(r.clone()).or_insert(0);
        *n = n.saturating_add(1);
    }
}

pub(crate) fn reset(counts: &mut HashMap<String, u32>, user_id: &str) {
    counts.insert(user_id.to_string(), 0);
}

impl AppCore {
    /// `user` opened `chat_id`: clear the local badge now, then tell the log.
    pub(super) fn unread_on_open(&mut self, chat_id: &str) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if !sess.index.contains(chat_id) {
            // Not created yet; nothing to reset.
            return;
        }
        let user_id = sess.user_id.clone();
        sess.index.clear_unread(chat_id, &user_id);

        let remote = self.remote.clone();
        let policy = self.config.unread_retry();
        let chat_id = chat_id.to_string();
        self.runtime.spawn(async move {
            let result = policy
                .run("reset_unread", || remote.reset_unread(&chat_id, &user_id))
                .await;
            if let Err(e) = result {
                tracing::warn!(%chat_id, %e, "reset_unread failed");
            }
        });
    }

    /// One of our sends was accepted by the log.
    pub(super) fn unread_on_confirmed_send(&mut self, chat_id: &str, participants: &[String]) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let recipients = recipients(participants, &sess.user_id);
        if recipients.is_empty() {
            return;
        }

        let remote = self.remote.clone();
        let policy = self.config.unread_retry();
        let chat_id = chat_id.to_string();
        self.runtime.spawn(async move {
            let result = policy
                .run("increment_unread", || {
                    remote.increment_unread(&chat_id, &recipients)
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(%chat_id, %e, "increment_unread failed");
            }
        });
    }
}
