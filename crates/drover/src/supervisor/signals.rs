//! Synchronous signal intake.
//!
//! The control signals are blocked on the supervisor thread and collected
//! with `sigwait`, so handling a signal is ordinary sequential code. Blocked
//! signals survive `execve`; anything that arrives while a reincarnated image
//! is starting stays pending until that image starts waiting.

use nix::errno::Errno;
use nix::sys::signal::{SigSet, SigmaskHow, Signal, pthread_sigmask, sigprocmask};
use thiserror::Error;
use tracing::debug;

use super::SUPERVISOR_TARGET;
use super::state::SupervisorEvent;

/// Signals consumed by the supervisor.
pub const CONTROL_SIGNALS: [Signal; 8] = [
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGHUP,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGCONT,
    Signal::SIGCHLD,
];

/// Source of supervisor events.
pub trait SignalSource {
    /// Blocks until the next control event is available.
    fn next_event(&mut self) -> Result<SupervisorEvent, SignalError>;
}

/// Errors raised by signal intake.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Changing the signal mask failed.
    #[error("failed to block control signals: {source}")]
    Mask {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Waiting for a signal failed.
    #[error("failed to wait for a signal: {source}")]
    Wait {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Collects control signals from the operating system.
#[derive(Debug)]
pub struct SystemSignals {
    set: SigSet,
}

impl SystemSignals {
    /// Blocks the control signals on the calling thread and returns a source
    /// that waits for them.
    ///
    /// Threads spawned afterwards inherit the mask, so only the supervisor
    /// loop observes these signals.
    pub fn install() -> Result<Self, SignalError> {
        let set = control_set();
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None)
            .map_err(|source| SignalError::Mask { source })?;
        Ok(Self { set })
    }
}

impl SignalSource for SystemSignals {
    fn next_event(&mut self) -> Result<SupervisorEvent, SignalError> {
        loop {
            let signal = self
                .set
                .wait()
                .map_err(|source| SignalError::Wait { source })?;
            match SupervisorEvent::from_signal(signal) {
                Some(event) => return Ok(event),
                None => {
                    debug!(target: SUPERVISOR_TARGET, ?signal, "ignoring signal");
                }
            }
        }
    }
}

/// Signal intake used by the launcher; the seam exists for tests.
pub trait SignalInstaller {
    /// Source returned once installed.
    type Source: SignalSource;

    /// Starts intercepting control signals.
    fn install(&self) -> Result<Self::Source, SignalError>;
}

/// Installs [`SystemSignals`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignalInstaller;

impl SignalInstaller for SystemSignalInstaller {
    type Source = SystemSignals;

    fn install(&self) -> Result<Self::Source, SignalError> {
        SystemSignals::install()
    }
}

/// Clears the signal mask of the calling process.
///
/// Forked workers and hook commands call this before running user code so
/// they see signals with their default dispositions. Only `sigprocmask` is
/// called, which keeps it usable between `fork` and `exec`.
pub fn restore_default_mask() -> Result<(), Errno> {
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
}

fn control_set() -> SigSet {
    let mut set = SigSet::empty();
    for signal in CONTROL_SIGNALS {
        set.add(signal);
    }
    set
}
