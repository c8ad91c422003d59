//! Tracing subscriber setup.
//!
//! The filter comes from `HIVEMINED_LOG`, then `RUST_LOG`, then the configured level.
//! Logs go to stderr so command output on stdout stays machine-readable.

use crate::core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "HIVEMINED_LOG";

/// Picks the filter directive. Invalid directives fall back to the configured level.
pub fn filter_directive(
    config: &LoggingConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    [lookup(LOG_ENV), lookup("RUST_LOG")]
        .into_iter()
        .flatten()
        .find(|d| !d.trim().is_empty() && EnvFilter::try_new(d).is_ok())
        .unwrap_or_else(|| config.level.clone())
}

/// Installs the global subscriber. Calling it twice is harmless: the second call is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    let directive = filter_directive(config, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log level '{}' ({}); using info", directive, err);
        EnvFilter::new("info")
    });

    let fmt_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .with_target(false)
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .ok();
}
