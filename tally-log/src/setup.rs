use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{LogConfig, LogFormat};

/// Crates of this workspace that log at the configured level.
const CRATE_NAMES: &[&str] = &[
    "tally",
    "tally_auth",
    "tally_common",
    "tally_config",
    "tally_log",
    "tally_metchan",
    "tally_metrics",
    "tally_outlet",
    "tally_redis",
    "tally_system",
    "tally_upstream",
];

/// Builds the filter for the configured level.
///
/// Third-party crates log at `INFO`, while all workspace crates use the configured level.
fn default_filter(config: &LogConfig) -> EnvFilter {
    let mut directives = String::from("info");
    for name in CRATE_NAMES {
        directives.push(',');
        directives.push_str(name);
        directives.push('=');
        directives.push_str(config.level.as_str());
    }

    EnvFilter::new(directives)
}

/// Initialize the logging system.
///
/// If the `RUST_LOG` environment variable is set, it takes precedence over the configured level.
/// Calling this function more than once has no effect.
///
/// # Example
///
/// ```
/// let config = tally_log::LogConfig::default();
/// tally_log::init(&config);
/// ```
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config));

    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(true)
            .boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .boxed(),
        (LogFormat::Json, _) => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(filter))
        .try_init()
        .ok();
}
