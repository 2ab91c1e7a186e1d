//! The master process: forks the pool, routes signals and drives shutdown.

use std::error::Error;
use std::thread;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::hooks::{HookKind, Hooks, SetupContext, TeardownContext};
use crate::worker::{WorkerAssignment, WorkerEntry};

pub mod control;
mod pool;
pub mod reaper;
mod settings;
pub mod signals;
mod state;
pub mod teardown;

pub use control::{ControlError, Delivery, ProcessControl, SystemProcessControl};
pub use pool::{PoolEntry, WorkerPool};
pub use reaper::TerminationReason;
pub use settings::PoolSettings;
pub use signals::{SignalError, SignalSource, SystemSignals};
pub use state::{SupervisorEvent, SupervisorOutcome, SupervisorState};
pub use teardown::TeardownOutcome;

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

const SIGNAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Owns one worker pool for the lifetime of a process image.
pub struct Supervisor<W, P = SystemProcessControl> {
    settings: PoolSettings,
    hooks: Hooks,
    worker: W,
    control: P,
    pool: WorkerPool,
    state: SupervisorState,
    pid: Pid,
}

impl<W, P> Supervisor<W, P>
where
    W: WorkerEntry,
    P: ProcessControl,
{
    /// Builds a supervisor in the `Starting` state.
    pub fn new(settings: PoolSettings, hooks: Hooks, worker: W, control: P) -> Self {
        Self {
            settings,
            hooks,
            worker,
            control,
            pool: WorkerPool::new(),
            state: SupervisorState::Starting,
            pid: Pid::this(),
        }
    }

    /// Starts the pool and handles events until a stop completes.
    ///
    /// Nothing escapes the loop: failures to read the next event are logged
    /// and retried.
    pub fn run<S>(&mut self, signals: &mut S) -> SupervisorOutcome
    where
        S: SignalSource + ?Sized,
    {
        self.start();
        loop {
            match signals.next_event() {
                Ok(event) => {
                    if let Some(outcome) = self.handle(event) {
                        return outcome;
                    }
                }
                Err(error) => {
                    error!(
                        target: SUPERVISOR_TARGET,
                        error = %error_chain(&error),
                        "failed to receive control signal"
                    );
                    thread::sleep(SIGNAL_RETRY_DELAY);
                }
            }
        }
    }

    /// Runs `setup`, reaps stale children and forks one worker per
    /// partition.
    ///
    /// A failing `setup` (or preloading `before_first_fork`) leaves the pool
    /// empty, but the supervisor still reaches `Running` and keeps serving
    /// signals.
    pub fn start(&mut self) {
        self.state = SupervisorState::Starting;
        info!(
            target: SUPERVISOR_TARGET,
            pid = self.pid.as_raw(),
            workers = self.settings.workload.len(),
            "starting worker pool"
        );
        if self.prepare() {
            self.reap_zombies();
            self.fork_pool();
        }
        self.state = SupervisorState::Running;
    }

    /// Applies one event; returns the outcome once the supervisor has
    /// stopped.
    pub fn handle(&mut self, event: SupervisorEvent) -> Option<SupervisorOutcome> {
        debug!(target: SUPERVISOR_TARGET, ?event, state = %self.state, "handling event");
        match event {
            SupervisorEvent::Quit => {
                self.stop(true);
                self.state = SupervisorState::Terminated;
                Some(SupervisorOutcome::Exit { graceful: true })
            }
            SupervisorEvent::Terminate(signal) => {
                info!(target: SUPERVISOR_TARGET, %signal, "terminating immediately");
                self.stop(false);
                self.state = SupervisorState::Terminated;
                Some(SupervisorOutcome::Exit { graceful: false })
            }
            SupervisorEvent::Hangup => {
                self.stop(true);
                self.state = SupervisorState::Reincarnating;
                Some(SupervisorOutcome::Reincarnate)
            }
            SupervisorEvent::PauseWorkers => {
                self.forward(Signal::SIGUSR1);
                None
            }
            SupervisorEvent::SuspendWorkers => {
                self.forward(Signal::SIGUSR2);
                self.state = SupervisorState::Suspended;
                None
            }
            SupervisorEvent::ResumeWorkers => {
                self.forward(Signal::SIGCONT);
                self.state = SupervisorState::Running;
                None
            }
            SupervisorEvent::ChildExited => {
                self.reap_zombies();
                None
            }
        }
    }

    /// Signals every worker, reaps them all, runs `teardown` under the
    /// timeout and clears the pool.
    pub fn stop(&mut self, graceful: bool) {
        self.state = SupervisorState::Stopping;
        let signal = if graceful {
            Signal::SIGQUIT
        } else {
            Signal::SIGTERM
        };
        let workers_stopped = self.pool.len();
        info!(
            target: SUPERVISOR_TARGET,
            %signal,
            workers = workers_stopped,
            "stopping worker pool"
        );
        for entry in &self.pool {
            match self.control.signal(entry.pid(), signal) {
                Ok(Delivery::Delivered) => {}
                Ok(Delivery::Gone) => {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        pid = entry.pid().as_raw(),
                        "worker already gone"
                    );
                }
                Err(error) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        error = %error_chain(&error),
                        "failed to signal worker"
                    );
                }
            }
        }
        self.reap_all();

        let context = TeardownContext::new(self.pid, graceful, workers_stopped);
        let outcome = teardown::run_bounded(
            self.hooks.take_teardown(),
            context,
            self.settings.teardown_timeout,
        );
        let clean = outcome.is_clean();
        match outcome {
            TeardownOutcome::Completed => {
                debug!(target: SUPERVISOR_TARGET, "teardown completed");
            }
            TeardownOutcome::Skipped => {}
            TeardownOutcome::TimedOut => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    timeout_ms = self.settings.teardown_timeout.as_millis(),
                    "teardown exceeded its timeout; continuing shutdown"
                );
            }
            TeardownOutcome::Failed(error) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    error = %error_chain(&error),
                    "teardown failed"
                );
            }
        }
        self.pool.clear();
        info!(target: SUPERVISOR_TARGET, graceful, clean, "worker pool stopped");
    }

    /// Swaps in freshly prepared settings, hooks and worker after a stop, so
    /// the next [`Supervisor::run`] starts the pool the way a new image
    /// would.
    pub fn reload(&mut self, settings: PoolSettings, hooks: Hooks, worker: W) {
        self.settings = settings;
        self.hooks = hooks;
        self.worker = worker;
    }

    /// Live workers.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Effective pool settings, including changes made by `setup`.
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Runs the hooks that must succeed before forking. Returns whether the
    /// pool may be forked.
    fn prepare(&mut self) -> bool {
        let mut context = SetupContext::new(self.pid, &mut self.settings);
        if let Some(Err(error)) = self.hooks.run_setup(&mut context) {
            error!(
                target: SUPERVISOR_TARGET,
                error = %error_chain(&error),
                "setup failed; no workers will be started"
            );
            return false;
        }
        if self.settings.preload_app
            && let Some(Err(error)) = self.hooks.run_fork_hook(HookKind::BeforeFirstFork)
        {
            error!(
                target: SUPERVISOR_TARGET,
                error = %error_chain(&error),
                "application preload failed; no workers will be started"
            );
            return false;
        }
        true
    }

    fn fork_pool(&mut self) {
        let Self {
            settings,
            hooks,
            worker,
            control,
            pool,
            ..
        } = self;
        let preload_app = settings.preload_app;
        for (index, partition) in settings.workload.iter().enumerate() {
            if let Some(Err(error)) = hooks.run_fork_hook(HookKind::BeforeFork) {
                warn!(
                    target: SUPERVISOR_TARGET,
                    index,
                    error = %error_chain(&error),
                    "before_fork failed; skipping worker"
                );
                continue;
            }
            let assignment = WorkerAssignment::new(index, partition.clone(), settings.work_interval);
            let mut body = || worker_main(hooks, worker, &assignment, preload_app);
            match control.fork_worker(&mut body) {
                Ok(pid) => {
                    info!(
                        target: SUPERVISOR_TARGET,
                        pid = pid.as_raw(),
                        index,
                        queues = %partition,
                        "forked worker"
                    );
                    pool.push(PoolEntry::new(pid, index, partition.clone()));
                }
                Err(error) => {
                    error!(
                        target: SUPERVISOR_TARGET,
                        index,
                        error = %error_chain(&error),
                        "failed to fork worker"
                    );
                }
            }
        }
    }

    /// Drains every terminated child without blocking.
    ///
    /// Crashed workers are not replaced; the next reincarnation restores the
    /// full pool.
    fn reap_zombies(&mut self) {
        loop {
            match self.control.try_reap() {
                Ok(Some((pid, reason))) => self.record_exit(pid, reason, true),
                Ok(None) => break,
                Err(error) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        error = %error_chain(&error),
                        "failed to reap children"
                    );
                    break;
                }
            }
        }
    }

    /// Waits for every child to terminate.
    fn reap_all(&mut self) {
        loop {
            match self.control.reap_blocking() {
                Ok(Some((pid, reason))) => self.record_exit(pid, reason, false),
                Ok(None) => break,
                Err(error) => {
                    error!(
                        target: SUPERVISOR_TARGET,
                        error = %error_chain(&error),
                        "failed to reap children"
                    );
                    break;
                }
            }
        }
    }

    fn record_exit(&mut self, pid: Pid, reason: TerminationReason, unexpected: bool) {
        match self.pool.remove(pid) {
            Some(entry) if unexpected && reason.is_success() => {
                info!(
                    target: SUPERVISOR_TARGET,
                    pid = pid.as_raw(),
                    index = entry.index(),
                    "worker finished; it will not be replaced until the next reincarnation"
                );
            }
            Some(entry) if unexpected => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    pid = pid.as_raw(),
                    index = entry.index(),
                    %reason,
                    "worker ended; it will not be replaced until the next reincarnation"
                );
            }
            Some(entry) => {
                info!(
                    target: SUPERVISOR_TARGET,
                    pid = pid.as_raw(),
                    index = entry.index(),
                    %reason,
                    "worker stopped"
                );
            }
            None => {
                debug!(
                    target: SUPERVISOR_TARGET,
                    pid = pid.as_raw(),
                    %reason,
                    "reaped unrelated child"
                );
            }
        }
    }

    fn forward(&mut self, signal: Signal) {
        debug!(
            target: SUPERVISOR_TARGET,
            %signal,
            workers = self.pool.len(),
            "forwarding signal"
        );
        for entry in &self.pool {
            if let Err(error) = self.control.signal(entry.pid(), signal) {
                warn!(
                    target: SUPERVISOR_TARGET,
                    pid = entry.pid().as_raw(),
                    error = %error_chain(&error),
                    "failed to forward signal"
                );
            }
        }
    }
}

/// Everything a forked child does; the return value is its exit status.
fn worker_main<W: WorkerEntry>(
    hooks: &mut Hooks,
    worker: &W,
    assignment: &WorkerAssignment,
    preload_app: bool,
) -> i32 {
    if let Err(error) = signals::restore_default_mask() {
        error!(target: SUPERVISOR_TARGET, %error, "failed to reset worker signal mask");
        return 1;
    }
    if let Some(Err(error)) = hooks.run_fork_hook(HookKind::AfterFork) {
        error!(target: SUPERVISOR_TARGET, error = %error_chain(&error), "after_fork failed");
        return 1;
    }
    if !preload_app
        && let Some(Err(error)) = hooks.run_fork_hook(HookKind::BeforeFirstFork)
    {
        error!(
            target: SUPERVISOR_TARGET,
            error = %error_chain(&error),
            "application load failed"
        );
        return 1;
    }
    match worker.run(assignment) {
        Ok(()) => 0,
        Err(error) => {
            error!(
                target: SUPERVISOR_TARGET,
                index = assignment.index(),
                error = %error_chain(error.as_ref()),
                "worker failed"
            );
            1
        }
    }
}

/// Renders an error followed by its `source` chain. Causes whose text the
/// message already ends with are not repeated.
pub(crate) fn error_chain(error: &dyn Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookError;

    #[test]
    fn error_chain_does_not_repeat_embedded_causes() {
        let error = HookError::Failed {
            hook: HookKind::Setup,
            source: "database unreachable".into(),
        };
        assert_eq!(
            error_chain(&error),
            "setup hook failed: database unreachable"
        );
    }
}
