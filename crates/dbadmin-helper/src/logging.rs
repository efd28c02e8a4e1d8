use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the bridge protocol.
pub fn init(log_level: &str) {
    // RUST_LOG wins over --log-level. sqlx logs every statement at info.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},sqlx=warn")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
