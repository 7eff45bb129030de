//! Logging setup

use tracing_subscriber::EnvFilter;

use crate::options::LogFormat;

/// Component name attached to every log line
pub const COMPONENT: &str = "robot-github-hook-delivery";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `verbose` when set.
pub fn init(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().with_current_span(true).init(),
    }
}
