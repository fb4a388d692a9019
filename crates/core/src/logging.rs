use tracing_subscriber::EnvFilter;

/// Initializes the process-wide `tracing` subscriber. Shared by every
/// `kairos-*` binary so log format and filter defaults stay consistent.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
