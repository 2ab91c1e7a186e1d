//! Logging for the supervisor process.
//!
//! One global `tracing` subscriber writes to stderr in the configured
//! [`LogFormat`]. It is installed after the process has detached, so a
//! daemon's events land in its `stderr_path`.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, fmt};

use drover_config::{Config, LogFormat};

type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Proof that the global subscriber is in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Why logging could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `log_filter` (or the level implied by `-v`/`-V`) is not a valid
    /// `EnvFilter` directive.
    #[error("invalid log filter {directive:?}: {source}")]
    Filter {
        /// Directive that failed to parse.
        directive: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },
    /// Another subscriber already owns the global slot.
    #[error("failed to install the log subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Installs the subscriber on first use; later calls are no-ops.
pub(crate) fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            let subscriber = subscriber_for(config)?;
            tracing::subscriber::set_global_default(subscriber)?;
            Ok(())
        })
        .map(|()| TelemetryHandle)
}

fn subscriber_for(config: &Config) -> Result<BoxedSubscriber, TelemetryError> {
    let directive = config.effective_log_filter();
    let filter = EnvFilter::try_new(directive).map_err(|source| TelemetryError::Filter {
        directive: directive.to_owned(),
        source,
    })?;
    let ansi = io::stderr().is_terminal();
    let base = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(UtcTime::rfc_3339());

    Ok(match config.log_format() {
        LogFormat::Json => Box::new(base.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(base.compact().finish()),
    })
}
