/// Structured logging setup for the demo binary.
///
/// `RUST_LOG` controls verbosity the usual `tracing-subscriber` way; falls
/// back to `info` for this crate and its dependencies when unset.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();
}
