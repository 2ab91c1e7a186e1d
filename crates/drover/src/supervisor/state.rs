//! Supervisor lifecycle states and the events that drive them.

use std::fmt;

use nix::sys::signal::Signal;

/// Where the supervisor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Running setup hooks and forking the pool.
    Starting,
    /// Workers are running; waiting for signals.
    Running,
    /// Workers have been asked to stop taking new jobs.
    Suspended,
    /// Signalling and reaping the pool.
    Stopping,
    /// Stopped; the process image is about to be replaced.
    Reincarnating,
    /// Stopped; the process is about to exit.
    Terminated,
}

impl SupervisorState {
    /// Whether workers are expected to be alive in this state.
    pub fn has_workers(self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Stopping => "stopping",
            Self::Reincarnating => "reincarnating",
            Self::Terminated => "terminated",
        };
        formatter.write_str(label)
    }
}

/// Control input consumed by the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// `QUIT`: graceful stop, then exit.
    Quit,
    /// `TERM` or `INT`: immediate stop, then exit.
    Terminate(Signal),
    /// `HUP`: graceful stop, then re-execute.
    Hangup,
    /// `USR1`: forwarded to every worker.
    PauseWorkers,
    /// `USR2`: forwarded to every worker.
    SuspendWorkers,
    /// `CONT`: forwarded to every worker.
    ResumeWorkers,
    /// `CHLD`: at least one child changed state.
    ChildExited,
}

impl SupervisorEvent {
    /// Maps a delivered signal to an event; `None` for signals the
    /// supervisor does not handle.
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGQUIT => Some(Self::Quit),
            Signal::SIGTERM | Signal::SIGINT => Some(Self::Terminate(signal)),
            Signal::SIGHUP => Some(Self::Hangup),
            Signal::SIGUSR1 => Some(Self::PauseWorkers),
            Signal::SIGUSR2 => Some(Self::SuspendWorkers),
            Signal::SIGCONT => Some(Self::ResumeWorkers),
            Signal::SIGCHLD => Some(Self::ChildExited),
            _ => None,
        }
    }

    /// Signal relayed to workers for forwarding events.
    pub fn forwarded_signal(self) -> Option<Signal> {
        match self {
            Self::PauseWorkers => Some(Signal::SIGUSR1),
            Self::SuspendWorkers => Some(Signal::SIGUSR2),
            Self::ResumeWorkers => Some(Signal::SIGCONT),
            Self::Quit | Self::Terminate(_) | Self::Hangup | Self::ChildExited => None,
        }
    }
}

/// How the supervisor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The process should exit.
    Exit {
        /// Whether workers were stopped with `QUIT`.
        graceful: bool,
    },
    /// The process should replace itself with a fresh image of the binary.
    Reincarnate,
}
