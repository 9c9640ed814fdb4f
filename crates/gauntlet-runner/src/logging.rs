//! Tracing subscriber setup

use crate::config::{LogFormat, RunnerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global subscriber filtered at `level`
///
/// `RUST_LOG` overrides `level` when set. Returns `false` if a subscriber
/// was already installed.
pub fn init_tracing(level: &str) -> bool {
    init_tracing_with(level, LogFormat::Text)
}

/// [`init_tracing`] with an explicit output format
pub fn init_tracing_with(level: &str, format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

/// Install the subscriber described by `config`'s `log_level` and `log_format`
pub fn init_from_config(config: &RunnerConfig) -> bool {
    init_tracing_with(&config.log_level, config.log_format)
}
