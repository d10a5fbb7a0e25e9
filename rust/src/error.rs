use thiserror::Error;

/// Failure reported by the remote log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote log unavailable: {0}")]
    Unavailable(String),
    #[error("feed disconnected")]
    Disconnected,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no profile for {0}")]
    NotFound(String),
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,
}

/// Errors the engine surfaces (or deliberately swallows) at its boundary.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("{feed} feed lost after {attempts} attempts: {source}")]
    Subscription {
        feed: &'static str,
        attempts: u32,
        #[source]
        source: RemoteError,
    },
    #[error("send failed: {0}")]
    Send(#[source] RemoteError),
}
