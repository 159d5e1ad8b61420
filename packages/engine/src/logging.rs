//! Tracing subscriber setup for binaries and tests embedding the engine.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `engine=debug,info`.
pub const LOG_ENV: &str = "CI_ENGINE_LOG";

/// Install a stderr fmt subscriber.
///
/// `level` wins over `CI_ENGINE_LOG`; without either, `info` is used. Safe to
/// call repeatedly: only the first call installs anything.
pub fn init_logging(level: Option<&str>) {
    let filter = level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_env(LOG_ENV).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
