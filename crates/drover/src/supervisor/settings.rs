//! Pool options resolved from configuration and adjustable by `setup`.

use std::time::Duration;

use drover_config::{Config, ConfigError, Workload};

/// Options the supervisor forks the pool with.
///
/// The `setup` hook receives these mutably before anything is forked. After
/// the pool starts they are fixed for the lifetime of the process image.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    /// One partition per worker, in fork order.
    pub workload: Workload,
    /// Poll interval handed to every worker.
    pub work_interval: Duration,
    /// Upper bound on the teardown hook.
    pub teardown_timeout: Duration,
    /// Run `before_first_fork` once in the supervisor instead of in each
    /// worker.
    pub preload_app: bool,
}

impl PoolSettings {
    /// Derives pool settings from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            workload: config.resolve_workload()?,
            work_interval: config.work_interval_duration()?,
            teardown_timeout: config.teardown_timeout_duration()?,
            preload_app: config.preload_app(),
        })
    }
}
