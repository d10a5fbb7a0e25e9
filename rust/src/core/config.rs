use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::FixedOffset;
use serde::Deserialize;

use super::AppCore;
use crate::error::RemoteError;

pub(super) const CONFIG_FILE: &str = "chat_sync_config.json";

const DEFAULT_SEND_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SEND_RETRY_BASE_MS: u64 = 500;
const SEND_RETRY_MAX_MS: u64 = 8_000;
const DEFAULT_RESUBSCRIBE_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RESUBSCRIBE_BASE_MS: u64 = 500;
const DEFAULT_RESUBSCRIBE_MAX_MS: u64 = 30_000;
const DEFAULT_UNREAD_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) send_max_attempts: Option<u32>,
    pub(super) send_retry_base_ms: Option<u64>,
    pub(super) resubscribe_max_attempts: Option<u32>,
    pub(super) resubscribe_base_ms: Option<u64>,
    pub(super) resubscribe_max_ms: Option<u64>,
    pub(super) unread_max_attempts: Option<u32>,
    // Render time labels in this fixed offset instead of the host zone.
    pub(super) utc_offset_minutes: Option<i32>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    match read_app_config(&path) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => AppConfig::default(),
        Err(e) => {
            tracing::warn!(err = %format!("{e:#}"), "ignoring config file");
            AppConfig::default()
        }
    }
}

fn read_app_config(path: &Path) -> anyhow::Result<Option<AppConfig>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let cfg = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(cfg))
}

/// Bounded exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RetryPolicy {
    pub(super) max_attempts: u32,
    pub(super) base: Duration,
    pub(super) max: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, `attempt` being 1-based.
    pub(super) fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Run `op` until it succeeds, fails with a non-transient error or runs
    /// out of attempts.
    pub(super) async fn run<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(what, attempt, ?delay, %e, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl AppConfig {
    pub(super) fn send_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .send_max_attempts
                .unwrap_or(DEFAULT_SEND_MAX_ATTEMPTS)
                .max(1),
            base: Duration::from_millis(
                self.send_retry_base_ms
                    .unwrap_or(DEFAULT_SEND_RETRY_BASE_MS),
            ),
            max: Duration::from_millis(SEND_RETRY_MAX_MS),
        }
    }

    /// Unread updates share the send backoff but get their own attempt budget.
    pub(super) fn unread_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .unread_max_attempts
                .unwrap_or(DEFAULT_UNREAD_MAX_ATTEMPTS)
                .max(1),
            ..self.send_retry()
        }
    }

    pub(super) fn resubscribe_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .resubscribe_max_attempts
                .unwrap_or(DEFAULT_RESUBSCRIBE_MAX_ATTEMPTS),
            base: Duration::from_millis(
                self.resubscribe_base_ms
                    .unwrap_or(DEFAULT_RESUBSCRIBE_BASE_MS),
            ),
            max: Duration::from_millis(
                self.resubscribe_max_ms
                    .unwrap_or(DEFAULT_RESUBSCRIBE_MAX_MS),
            ),
        }
    }
}

impl AppCore {
    /// Label for a timestamp relative to the current wall clock.
    pub(super) fn time_label(&self, timestamp_ms: i64) -> String {
        let offset = self
            .config
            .utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m.saturating_mul(60)));
        match offset {
            Some(offset) => {
                crate::time_label::time_label(&chrono::Utc::now().with_timezone(&offset), timestamp_ms)
            }
            None => crate::time_label::time_label(&chrono::Local::now(), timestamp_ms),
        }
    }
}
