//! Termination status of reaped workers.

use std::fmt;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Why a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
    /// Any other wait status.
    Unknown,
}

impl TerminationReason {
    /// Whether the worker exited with status 0.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(formatter, "exited with code {code}"),
            Self::Signaled(signal) => write!(formatter, "killed by {signal}"),
            Self::Unknown => formatter.write_str("ended for an unknown reason"),
        }
    }
}

/// Converts a wait status into the reaped PID and its reason; `None` when the
/// status does not describe a terminated child.
pub(crate) fn terminated(status: WaitStatus) -> Option<(Pid, TerminationReason)> {
    match status {
        WaitStatus::Exited(pid, code) => Some((pid, TerminationReason::Exited(code))),
        WaitStatus::Signaled(pid, signal, _) => Some((pid, TerminationReason::Signaled(signal))),
        WaitStatus::StillAlive | WaitStatus::Stopped(..) | WaitStatus::Continued(_) => None,
        other => other.pid().map(|pid| (pid, TerminationReason::Unknown)),
    }
}
