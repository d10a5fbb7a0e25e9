// Profile lookups. Each user is fetched at most once per session; failures
// are remembered and only retried when the app comes back to the foreground.

use std::collections::HashMap;

use super::*;
use crate::error::LookupError;
use crate::model::UserProfile;
use crate::state::ProfileView;

pub(crate) const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone)]
pub(crate) enum ProfileEntry {
    Loading,
    Resolved(UserProfile),
    Failed(LookupError),
}

#[derive(Debug, Default)]
pub(crate) struct ProfileBook {
    entries: HashMap<String, ProfileEntry>,
}

impl ProfileBook {
    pub(crate) fn get(&self, user_id: &str) -> Option<&UserProfile> {
        match self.entries.get(user_id) {
            Some(ProfileEntry::Resolved(p)) => Some(p),
            _ => None,
        }
    }

    fn failure(&self, user_id: &str) -> Option<&LookupError> {
        match self.entries.get(user_id) {
            Some(ProfileEntry::Failed(e)) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn display_name(&self, user_id: &str) -> &str {
        self.get(user_id)
            .map(|p| p.display_name.as_str())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(UNKNOWN_NAME)
    }

    pub(crate) fn avatar_ref(&self, user_id: &str) -> Option<&str> {
        self.get(user_id).and_then(|p| p.avatar_ref.as_deref())
    }

    /// Mark `user_id` as loading. False if it was already requested.
    pub(crate) fn begin(&mut self, user_id: &str) -> bool {
        if self.entries.contains_key(user_id) {
            return false;
        }
        self.entries
            .insert(user_id.to_string(), ProfileEntry::Loading);
        true
    }

    pub(crate) fn record(&mut self, user_id: &str, result: Result<UserProfile, LookupError>) {
        let entry = match result {
            Ok(p) => ProfileEntry::Resolved(p),
            Err(e) => ProfileEntry::Failed(e),
        };
        self.entries.insert(user_id.to_string(), entry);
    }

    /// Forget failed lookups so they get requested again.
    pub(crate) fn take_failed(&mut self) -> Vec<String> {
        let failed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, ProfileEntry::Failed(_)))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &failed {
            self.entries.remove(id);
        }
        failed
    }

    /// Placeholder fields until the profile resolves.
    pub(crate) fn view(&self, user_id: &str) -> ProfileView {
        let p = self.get(user_id);
        ProfileView {
            user_id: user_id.to_string(),
            display_name: self.display_name(user_id).to_string(),
            status: p.and_then(|p| p.status.clone()),
            avatar_ref: p.and_then(|p| p.avatar_ref.clone()),
            phone: p.and_then(|p| p.phone.clone()),
            lookup_error: self.failure(user_id).map(|e| e.to_string()),
        }
    }
}

impl AppCore {
    /// Fetch every profile in `user_ids` not yet requested this session.
    pub(super) fn request_profiles<I, S>(&mut self, user_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        for user_id in user_ids {
            let user_id = user_id.as_ref();
            if !sess.profiles.begin(user_id) {
                continue;
            }
            let directory = self.directory.clone();
            let tx = self.core_sender.clone();
            let epoch = sess.epoch;
            let user_id = user_id.to_string();
            self.runtime.spawn(async move {
                let result = directory.get(&user_id).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ProfileFetched {
                    epoch,
                    user_id,
                    result,
                })));
            });
        }
    }

    pub(super) fn on_profile_fetched(
        &mut self,
        epoch: u64,
        user_id: String,
        result: Result<UserProfile, LookupError>,
    ) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if sess.epoch != epoch {
            return;
        }
        if let Err(e) = &result {
            // Rows keep their placeholder; retried on the next foreground.
            tracing::debug!(%user_id, %e, "profile lookup failed");
        }
        sess.profiles.record(&user_id, result);

        self.refresh_profiles();
        self.refresh_chat_list();
        self.refresh_current_chat();
        self.emit_state();
    }

    pub(super) fn retry_failed_profiles(&mut self) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let failed = sess.profiles.take_failed();
        if !failed.is_empty() {
            tracing::info!(count = failed.len(), "retrying profile lookups");
        }
        self.request_profiles(failed);
    }

    pub(super) fn view_profile(&mut self, user_id: &str) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        sess.viewing_profile = Some(user_id.to_string());
        self.request_profiles([user_id]);
        self.refresh_profiles();
        self.emit_state();
    }

    pub(super) fn close_profile(&mut self) {
        if let Some(sess) = self.session.as_mut() {
            sess.viewing_profile = None;
        }
        self.refresh_profiles();
        self.emit_state();
    }

    pub(super) fn refresh_profiles(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            self.state.my_profile = None;
            self.state.peer_profile = None;
            return;
        };
        self.state.my_profile = Some(sess.profiles.view(&sess.user_id));
        self.state.peer_profile = sess
            .viewing_profile
            .as_deref()
            .map(|id| sess.profiles.view(id));
    }
}
