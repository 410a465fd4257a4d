use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Map a `RUST_LOG`-style value to a max level; unknown values mean info
pub fn level_from_str(value: &str) -> tracing::Level {
    match value.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Install a compact stderr subscriber for pool events.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let (non_blocking_writer, guard) = non_blocking(std::io::stderr());
    // Keep guard alive for the program lifetime to avoid log loss
    if LOG_GUARD.set(guard).is_err() {
        return;
    }

    let level = level_from_str(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));

    let _ = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .compact()
        .with_max_level(level)
        .try_init();
}
