//! Master-process supervisor for pools of forked worker processes.
//!
//! `drover` does not process jobs. It decides when and how many worker
//! processes run, routes operating-system signals to them, and coordinates
//! graceful shutdown and zero-downtime restarts. The moving parts are:
//!
//! - [`process`]: daemonisation with a readiness handshake, the PID file and
//!   the launch sequence that ties configuration, telemetry and the
//!   supervisor together.
//! - [`supervisor`]: the worker pool, signal intake, reaping and the
//!   stop/reincarnate state machine.
//! - [`hooks`]: the `setup`, `teardown`, `before_fork`, `after_fork` and
//!   `before_first_fork` extension points.
//! - [`worker`]: the boundary with the job-processing code each child runs.
//!
//! ## Signals
//!
//! | Signal | Effect |
//! |---|---|
//! | `QUIT` | graceful stop, then exit |
//! | `TERM`, `INT` | immediate stop, then exit |
//! | `USR1`, `USR2`, `CONT` | forwarded to every worker |
//! | `HUP` | graceful stop, then re-execute the binary under the same PID |
//!
//! Signal arrival never runs supervisor code asynchronously. The control
//! signals are blocked and consumed one at a time by the main loop, so hooks
//! and reaping only ever run from ordinary control flow.

pub mod hooks;
pub mod process;
pub mod supervisor;
mod telemetry;
pub mod worker;

/// Boxed error returned by hooks and worker entry points.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use hooks::{HookError, HookKind, HookResult, Hooks, SetupContext, TeardownContext};
pub use process::{
    Application, CommandApplication, ConfigLoader, LaunchError, LaunchOutcome, ReadinessReport,
    StaticConfigLoader, SystemConfigLoader, run,
};
pub use supervisor::{
    PoolSettings, Supervisor, SupervisorEvent, SupervisorOutcome, SupervisorState,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use worker::{CommandWorker, WorkerAssignment, WorkerEntry};

#[cfg(test)]
mod tests;
