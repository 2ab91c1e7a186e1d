//! Shared configuration for the drover supervisor.
//!
//! [`Config`] is resolved once at start-up from defaults, a configuration
//! file, `DROVER_*` environment variables and command-line flags (in that
//! order of precedence) through `ortho_config`. The supervisor core never
//! re-reads it; a reincarnation re-executes the binary, which resolves a fresh
//! configuration from scratch.

mod defaults;
mod logging;
mod workload;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_PRELOAD_APP, DEFAULT_TEARDOWN_TIMEOUT_SECS,
    DEFAULT_WORK_INTERVAL_SECS, DEFAULT_WORKER_PROCESSES, DEFAULT_WORKER_QUEUES, NULL_DEVICE, default_log_filter,
    default_log_filter_string, default_log_format, default_output_path, default_worker_queues,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use workload::{MATCH_ALL_QUEUE, Partition, PartitionParseError, Workload};

/// Resolved supervisor configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DROVER")]
pub struct Config {
    /// Explicit queue partitions, one per worker (e.g. `"high,low"`).
    /// When empty the workload is `worker_processes` copies of
    /// `worker_queues`.
    #[serde(default)]
    #[ortho_config(cli_short = 'w')]
    pub workload: Vec<String>,
    /// Number of workers forked when no explicit workload is given.
    #[ortho_config(default = defaults::DEFAULT_WORKER_PROCESSES, cli_short = 'n')]
    pub worker_processes: usize,
    /// Comma-separated queues assigned to derived workers.
    #[ortho_config(default = defaults::default_worker_queues(), cli_short = 'q')]
    pub worker_queues: String,
    /// Poll interval handed to each worker, in seconds.
    #[ortho_config(default = defaults::DEFAULT_WORK_INTERVAL_SECS, cli_short = 'i')]
    pub work_interval: f64,
    /// Maximum number of seconds to wait for the teardown hook.
    #[ortho_config(default = defaults::DEFAULT_TEARDOWN_TIMEOUT_SECS, cli_short = 't')]
    pub teardown_timeout: f64,
    /// File receiving the supervisor's PID.
    #[ortho_config(cli_short = 'p')]
    pub pid_path: Option<Utf8PathBuf>,
    /// Daemon standard output destination (appended).
    #[ortho_config(cli_short = 'o')]
    pub stdout_path: Option<Utf8PathBuf>,
    /// Daemon standard error destination (appended); receives the log.
    #[ortho_config(cli_short = 'e')]
    pub stderr_path: Option<Utf8PathBuf>,
    /// Working directory the daemon changes into.
    #[ortho_config(cli_short = 'r')]
    pub runpath: Option<Utf8PathBuf>,
    /// Detach from the terminal and run in the background. Unset means
    /// `false`; see [`Config::daemon`].
    #[ortho_config(cli_short = 'd')]
    pub daemon: Option<bool>,
    /// Run `before_first_fork` once in the supervisor rather than in every
    /// worker. Unset means `true`; see [`Config::preload_app`].
    #[ortho_config(cli_short = 'k')]
    pub preload_app: Option<bool>,
    /// Log at debug level.
    #[ortho_config(cli_short = 'v')]
    pub verbose: Option<bool>,
    /// Log at trace level.
    #[ortho_config(cli_short = 'x')]
    pub very_verbose: Option<bool>,
    /// Log filter expression used when no verbosity flag is set.
    #[ortho_config(default = defaults::default_log_filter_string(), cli_short = 'l')]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = defaults::default_log_format(), cli_short = 'f')]
    pub log_format: LogFormat,
    /// Shell command each worker execs; receives `QUEUES` and `INTERVAL`.
    #[ortho_config(cli_short = 'W')]
    pub worker_command: Option<String>,
    /// Shell command run once before any worker is forked.
    #[ortho_config(cli_short = 's')]
    pub setup_command: Option<String>,
    /// Shell command run once while shutting down.
    #[ortho_config(cli_short = 'T')]
    pub teardown_command: Option<String>,
    /// Shell command run in the supervisor before each fork.
    #[ortho_config(cli_short = 'b')]
    pub before_fork_command: Option<String>,
    /// Shell command run inside each worker right after it is forked.
    #[ortho_config(cli_short = 'a')]
    pub after_fork_command: Option<String>,
    /// Shell command that loads the application before the first fork.
    #[ortho_config(cli_short = 'B')]
    pub before_first_fork_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workload: Vec::new(),
            worker_processes: DEFAULT_WORKER_PROCESSES,
            worker_queues: default_worker_queues(),
            work_interval: DEFAULT_WORK_INTERVAL_SECS,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT_SECS,
            pid_path: None,
            stdout_path: None,
            stderr_path: None,
            runpath: None,
            daemon: None,
            preload_app: None,
            verbose: None,
            very_verbose: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            worker_command: None,
            setup_command: None,
            teardown_command: None,
            before_fork_command: None,
            after_fork_command: None,
            before_first_fork_command: None,
        }
    }
}

impl Config {
    /// Documented defaults; identical to [`Config::default`].
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Applies explicit overrides, keeping the current value for every field
    /// the overrides leave unset.
    #[must_use]
    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        let ConfigOverrides {
            workload,
            worker_processes,
            worker_queues,
            work_interval,
            teardown_timeout,
            pid_path,
            stdout_path,
            stderr_path,
            runpath,
            daemon,
            preload_app,
            verbose,
            very_verbose,
        } = overrides;
        if let Some(value) = workload {
            self.workload = value;
        }
        if let Some(value) = worker_processes {
            self.worker_processes = value;
        }
        if let Some(value) = worker_queues {
            self.worker_queues = value;
        }
        if let Some(value) = work_interval {
            self.work_interval = value;
        }
        if let Some(value) = teardown_timeout {
            self.teardown_timeout = value;
        }
        if pid_path.is_some() {
            self.pid_path = pid_path;
        }
        if stdout_path.is_some() {
            self.stdout_path = stdout_path;
        }
        if stderr_path.is_some() {
            self.stderr_path = stderr_path;
        }
        if runpath.is_some() {
            self.runpath = runpath;
        }
        if daemon.is_some() {
            self.daemon = daemon;
        }
        if preload_app.is_some() {
            self.preload_app = preload_app;
        }
        if verbose.is_some() {
            self.verbose = verbose;
        }
        if very_verbose.is_some() {
            self.very_verbose = very_verbose;
        }
        self
    }

    /// Checks every derived value, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.work_interval_duration()?;
        self.teardown_timeout_duration()?;
        self.resolve_workload()?;
        Ok(())
    }

    /// Partitions to fork, one per worker.
    pub fn resolve_workload(&self) -> Result<Workload, ConfigError> {
        if self.workload.is_empty() {
            let partition = self
                .worker_queues
                .parse::<Partition>()
                .map_err(|source| ConfigError::WorkerQueues { source })?;
            return Ok(Workload::repeated(&partition, self.worker_processes));
        }
        self.workload
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                raw.parse::<Partition>()
                    .map_err(|source| ConfigError::Partition { index, source })
            })
            .collect()
    }

    /// Worker poll interval.
    pub fn work_interval_duration(&self) -> Result<Duration, ConfigError> {
        seconds("work_interval", self.work_interval)
    }

    /// Bound on the teardown hook.
    pub fn teardown_timeout_duration(&self) -> Result<Duration, ConfigError> {
        seconds("teardown_timeout", self.teardown_timeout)
    }

    /// Filter expression after applying the verbosity flags.
    pub fn effective_log_filter(&self) -> &str {
        if self.very_verbose.unwrap_or(false) {
            "trace"
        } else if self.verbose.unwrap_or(false) {
            "debug"
        } else {
            self.log_filter.as_str()
        }
    }

    /// Whether to detach into the background; `false` unless set.
    pub fn daemon(&self) -> bool {
        self.daemon.unwrap_or(false)
    }

    /// Whether `before_first_fork` runs once in the supervisor;
    /// [`DEFAULT_PRELOAD_APP`] unless set.
    pub fn preload_app(&self) -> bool {
        self.preload_app.unwrap_or(DEFAULT_PRELOAD_APP)
    }

    /// Configured log format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Daemon standard output destination.
    pub fn stdout_path_or_default(&self) -> Utf8PathBuf {
        self.stdout_path.clone().unwrap_or_else(default_output_path)
    }

    /// Daemon standard error destination.
    pub fn stderr_path_or_default(&self) -> Utf8PathBuf {
        self.stderr_path.clone().unwrap_or_else(default_output_path)
    }

    /// Configured PID file, if any.
    pub fn pid_path(&self) -> Option<&Utf8Path> {
        self.pid_path.as_deref()
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

/// Explicit settings layered over [`Config::defaults`] by embedders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    /// Explicit partitions.
    pub workload: Option<Vec<String>>,
    /// Derived worker count.
    pub worker_processes: Option<usize>,
    /// Derived worker queues.
    pub worker_queues: Option<String>,
    /// Poll interval in seconds.
    pub work_interval: Option<f64>,
    /// Teardown bound in seconds.
    pub teardown_timeout: Option<f64>,
    /// PID file path.
    pub pid_path: Option<Utf8PathBuf>,
    /// Daemon stdout path.
    pub stdout_path: Option<Utf8PathBuf>,
    /// Daemon stderr path.
    pub stderr_path: Option<Utf8PathBuf>,
    /// Daemon working directory.
    pub runpath: Option<Utf8PathBuf>,
    /// Background mode.
    pub daemon: Option<bool>,
    /// Preload mode.
    pub preload_app: Option<bool>,
    /// Debug logging.
    pub verbose: Option<bool>,
    /// Trace logging.
    pub very_verbose: Option<bool>,
}

/// Errors raised while validating a resolved [`Config`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A duration setting was negative, infinite or not a number.
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration {
        /// Name of the offending setting.
        field: &'static str,
        /// Value that failed conversion.
        value: f64,
    },
    /// An explicit workload entry did not parse.
    #[error("invalid partition at workload[{index}]: {source}")]
    Partition {
        /// Position of the entry in `workload`.
        index: usize,
        /// Parse failure.
        #[source]
        source: PartitionParseError,
    },
    /// `worker_queues` did not parse.
    #[error("invalid worker_queues: {source}")]
    WorkerQueues {
        /// Parse failure.
        #[source]
        source: PartitionParseError,
    },
}
