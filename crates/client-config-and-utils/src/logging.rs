//! Logging initialization for the security stack.

/// Initialize the tracing subscriber.
///
/// Log level comes from the RUST_LOG env var when set, otherwise from the
/// provided default. Safe to call once per process; subsequent calls are
/// ignored rather than panicking so tests can initialize freely.
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("security stack ready");
/// ```
pub fn init_logging(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(true)
        .compact()
        .try_init();
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
