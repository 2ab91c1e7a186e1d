//! Operating-system process primitives used by the supervisor.

use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use thiserror::Error;

use super::reaper::{TerminationReason, terminated};

/// Exit status used when a worker body panics.
pub(crate) const PANIC_EXIT_CODE: i32 = 70;

/// Outcome of sending a signal to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The signal was queued for the process.
    Delivered,
    /// The process no longer exists.
    Gone,
}

/// Process operations the supervisor depends on.
pub trait ProcessControl {
    /// Forks a child that runs `body` and exits with the status it returns.
    /// The parent receives the child's PID.
    fn fork_worker(&mut self, body: &mut dyn FnMut() -> i32) -> Result<Pid, ControlError>;

    /// Sends `signal` to `pid`.
    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<Delivery, ControlError>;

    /// Collects one terminated child without blocking.
    fn try_reap(&mut self) -> Result<Option<(Pid, TerminationReason)>, ControlError>;

    /// Waits for the next child to terminate; `None` once no children
    /// remain.
    fn reap_blocking(&mut self) -> Result<Option<(Pid, TerminationReason)>, ControlError>;
}

/// Errors from process primitives.
#[derive(Debug, Error)]
pub enum ControlError {
    /// `fork` failed.
    #[error("fork failed: {source}")]
    Fork {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// `kill` failed for a reason other than a missing process.
    #[error("failed to send {signal} to {pid}: {source}")]
    Signal {
        /// Target process.
        pid: Pid,
        /// Signal being sent.
        signal: Signal,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// `waitpid` failed.
    #[error("waitpid failed: {source}")]
    Wait {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// [`ProcessControl`] backed by `fork`, `kill` and `waitpid`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

impl SystemProcessControl {
    fn wait(flags: Option<WaitPidFlag>) -> Result<Option<(Pid, TerminationReason)>, ControlError> {
        loop {
            match waitpid(None::<Pid>, flags) {
                Ok(status) => match terminated(status) {
                    Some(reaped) => return Ok(Some(reaped)),
                    None if flags.is_some() => return Ok(None),
                    None => {}
                },
                Err(Errno::ECHILD) => return Ok(None),
                Err(Errno::EINTR) => {}
                Err(source) => return Err(ControlError::Wait { source }),
            }
        }
    }
}

impl ProcessControl for SystemProcessControl {
    fn fork_worker(&mut self, body: &mut dyn FnMut() -> i32) -> Result<Pid, ControlError> {
        // SAFETY: the supervisor is single-threaded while forking; the only
        // other thread it ever starts runs teardown, after the pool is gone.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child),
            Ok(ForkResult::Child) => {
                let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(PANIC_EXIT_CODE);
                // SAFETY: `_exit` skips the parent's atexit handlers and
                // stdio buffers, which belong to the supervisor.
                unsafe { libc::_exit(code) }
            }
            Err(source) => Err(ControlError::Fork { source }),
        }
    }

    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<Delivery, ControlError> {
        match kill(pid, signal) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(Errno::ESRCH) => Ok(Delivery::Gone),
            Err(source) => Err(ControlError::Signal {
                pid,
                signal,
                source,
            }),
        }
    }

    fn try_reap(&mut self) -> Result<Option<(Pid, TerminationReason)>, ControlError> {
        Self::wait(Some(WaitPidFlag::WNOHANG))
    }

    fn reap_blocking(&mut self) -> Result<Option<(Pid, TerminationReason)>, ControlError> {
        Self::wait(None)
    }
}
