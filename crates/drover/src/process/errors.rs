//! Defines the unified error surface for launching the supervisor.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

use ortho_config::OrthoError;

use drover_config::ConfigError;

use crate::supervisor::SignalError;
use crate::telemetry::TelemetryError;

use super::daemonizer::DaemonizeError;
use super::reexec::ReexecError;

/// Errors surfaced while launching the supervisor.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// A configuration value was unusable.
    #[error("invalid configuration: {source}")]
    Validation {
        /// Underlying validation error.
        #[source]
        source: ConfigError,
    },
    /// The application could not build its hooks or worker.
    #[error("application is not runnable: {message}")]
    Application {
        /// Human-readable reason.
        message: String,
    },
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Signal handling could not be installed.
    #[error("failed to install signal handling: {source}")]
    Signals {
        /// Underlying signal error.
        #[source]
        source: SignalError,
    },
    /// Preparing the reincarnation command failed.
    #[error("failed to prepare reincarnation: {source}")]
    Reexec {
        /// Underlying re-execution error.
        #[source]
        source: ReexecError,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<ConfigError> for LaunchError {
    fn from(source: ConfigError) -> Self {
        Self::Validation { source }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<SignalError> for LaunchError {
    fn from(source: SignalError) -> Self {
        Self::Signals { source }
    }
}

impl From<ReexecError> for LaunchError {
    fn from(source: ReexecError) -> Self {
        Self::Reexec { source }
    }
}
