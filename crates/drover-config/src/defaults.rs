use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Number of workers forked when no explicit workload is configured.
pub const DEFAULT_WORKER_PROCESSES: usize = 1;

/// Queue list assigned to derived workers: match every queue.
pub const DEFAULT_WORKER_QUEUES: &str = "*";

/// Poll interval handed to each worker, in seconds.
pub const DEFAULT_WORK_INTERVAL_SECS: f64 = 5.0;

/// Upper bound on the teardown hook, in seconds.
pub const DEFAULT_TEARDOWN_TIMEOUT_SECS: f64 = 5.0;

/// Whether `before_first_fork` runs once in the supervisor when
/// `preload_app` is unset.
pub const DEFAULT_PRELOAD_APP: bool = true;

/// Default log filter expression used by the supervisor.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Sink used for daemon output streams that were not configured.
pub const NULL_DEVICE: &str = "/dev/null";

/// Owned queue list used where allocation is required (e.g. serde).
pub fn default_worker_queues() -> String {
    DEFAULT_WORKER_QUEUES.to_owned()
}

/// Default log filter expression used by the supervisor.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the supervisor.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Path the daemon redirects an unconfigured output stream to.
pub fn default_output_path() -> Utf8PathBuf {
    Utf8PathBuf::from(NULL_DEVICE)
}
