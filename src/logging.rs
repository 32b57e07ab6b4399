//! Logging setup wrapping `tracing` initialisation

use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::{Error, Result};

/// Environment variable that overrides the requested filter.
pub const LOG_ENV: &str = "V4L2_CAPTURE_LOG";

/// Install the global tracing subscriber, writing to stderr.
///
/// `level` is any `EnvFilter` directive (`info`, `v4l2_capture=debug`, ...);
/// [`LOG_ENV`] takes precedence when set. Calls after the first are ignored.
pub fn init(level: &str, color: bool) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let directive = std::env::var(LOG_ENV).unwrap_or_else(|_| level.to_owned());
    let filter = filter(&directive)?;

    Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(color)
                .with_timer(UtcTime::rfc_3339())
                .with_target(false),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}

fn filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| Error::Config(format!("invalid log level '{directive}': {e}")))
}
