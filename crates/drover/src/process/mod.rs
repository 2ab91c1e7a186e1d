//! Process lifecycle around the supervisor: detachment, readiness, PID file
//! and re-execution.

pub mod daemonizer;
mod errors;
mod launch;
mod paths;
mod pid_file;
pub mod readiness;
pub mod reexec;
mod streams;

pub use daemonizer::{DaemonizeError, Daemonizer, Detached, SystemDaemonizer};
pub use errors::LaunchError;
pub use launch::{
    Application, CommandApplication, ConfigLoader, LaunchMode, LaunchOutcome, StaticConfigLoader,
    SystemConfigLoader, run,
};
#[cfg(test)]
pub(crate) use launch::{LaunchPlan, ProcessDeps, ServiceDeps, run_with};
pub use paths::DaemonPaths;
pub use readiness::{ReadinessNotifier, ReadinessReport};
pub use reexec::{ImageReplacer, ReexecCommand, ReexecError, SystemImageReplacer};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Environment variable marking a re-executed image.
pub const REINCARNATION_ENV_VAR: &str = "DROVER_REINCARNATION";
