//! In-memory stand-in for `fork`, `kill` and `waitpid`.
//!
//! Forking runs the child body inline and records its exit status, so tests
//! observe exactly what a real child would have done.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::supervisor::{ControlError, Delivery, ProcessControl, TerminationReason};

const FIRST_PID: i32 = 1000;

#[derive(Debug, Default)]
struct FakeState {
    forks: usize,
    failing_forks: BTreeSet<usize>,
    live: Vec<Pid>,
    exited: VecDeque<(Pid, TerminationReason)>,
    signals: Vec<(Pid, Signal)>,
    exit_codes: Vec<(Pid, i32)>,
}

/// Cloneable handle; clones share the same simulated process table.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProcessControl {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProcessControl {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the fork attempt with the given zero-based ordinal fail.
    pub(crate) fn fail_fork(&self, attempt: usize) {
        self.state().failing_forks.insert(attempt);
    }

    /// Simulates a worker dying on its own.
    pub(crate) fn crash(&self, pid: Pid) {
        let mut state = self.state();
        state.live.retain(|live| *live != pid);
        state
            .exited
            .push_back((pid, TerminationReason::Signaled(Signal::SIGKILL)));
    }

    /// Simulates a child the supervisor never forked exiting.
    pub(crate) fn orphan_exit(&self, pid: Pid) {
        self.state()
            .exited
            .push_back((pid, TerminationReason::Exited(0)));
    }

    pub(crate) fn live(&self) -> Vec<Pid> {
        self.state().live.clone()
    }

    pub(crate) fn signals(&self) -> Vec<(Pid, Signal)> {
        self.state().signals.clone()
    }

    pub(crate) fn signals_named(&self, signal: Signal) -> Vec<Pid> {
        self.state()
            .signals
            .iter()
            .filter(|(_, sent)| *sent == signal)
            .map(|(pid, _)| *pid)
            .collect()
    }

    pub(crate) fn exit_codes(&self) -> Vec<(Pid, i32)> {
        self.state().exit_codes.clone()
    }
}

impl ProcessControl for FakeProcessControl {
    fn fork_worker(&mut self, body: &mut dyn FnMut() -> i32) -> Result<Pid, ControlError> {
        let pid = {
            let mut state = self.state();
            let attempt = state.forks;
            state.forks += 1;
            if state.failing_forks.contains(&attempt) {
                return Err(ControlError::Fork {
                    source: Errno::EAGAIN,
                });
            }
            let offset = i32::try_from(attempt).unwrap_or(i32::MAX - FIRST_PID);
            let pid = Pid::from_raw(FIRST_PID + offset);
            state.live.push(pid);
            pid
        };
        let code = body();
        self.state().exit_codes.push((pid, code));
        Ok(pid)
    }

    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<Delivery, ControlError> {
        let mut state = self.state();
        state.signals.push((pid, signal));
        if state.live.contains(&pid) {
            Ok(Delivery::Delivered)
        } else {
            Ok(Delivery::Gone)
        }
    }

    fn try_reap(&mut self) -> Result<Option<(Pid, TerminationReason)>, ControlError> {
        Ok(self.state().exited.pop_front())
    }

    fn reap_blocking(&mut self) -> Result<Option<(Pid, TerminationReason)>, ControlError> {
        let mut state = self.state();
        if let Some(reaped) = state.exited.pop_front() {
            return Ok(Some(reaped));
        }
        if state.live.is_empty() {
            return Ok(None);
        }
        let pid = state.live.remove(0);
        Ok(Some((pid, TerminationReason::Exited(0))))
    }
}
