use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "chat_sync_core=debug,info";
const LOG_FILE: &str = "chat_sync.log";

/// Logging initialization, called once at the start of `ChatApp::new()`.
///
/// Writes to stderr and appends to `<data_dir>/chat_sync.log`. `RUST_LOG`
/// overrides the default filter. Later calls (every app a test builds) are
/// no-ops, and so is this one when the host already installed a global
/// subscriber: the host's subscriber keeps receiving every event and the log
/// file stays empty.
pub fn init_logging(data_dir: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let log_path = std::path::Path::new(data_dir).join(LOG_FILE);
    let _ = std::fs::create_dir_all(data_dir);
    let file_layer = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok()
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
        });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}
