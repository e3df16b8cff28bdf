use tracing_subscriber::EnvFilter;

/// Initializes tracing output on stderr.
///
/// `RUST_LOG` wins when set; otherwise `log_level` is used.
pub fn init(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
