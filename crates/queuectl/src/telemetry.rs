use tracing_subscriber::EnvFilter;

/// Install the process-wide fmt subscriber, writing to stderr so command
/// output on stdout stays machine-readable.
///
/// `RUST_LOG` overrides `default_filter`. Later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
