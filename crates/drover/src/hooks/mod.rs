//! Lifecycle extension points invoked by the supervisor.
//!
//! Hooks are plain closures stored on a [`Hooks`] value owned by the
//! supervisor. Each is optional. Failures and panics are converted into
//! [`HookError`] so a misbehaving hook can never unwind through the
//! supervisor loop.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};

use nix::unistd::Pid;
use thiserror::Error;

use crate::BoxError;
use crate::supervisor::PoolSettings;

pub(crate) mod command;

pub use command::{CommandHook, CommandHookError, command_hooks};

/// Value returned by hook bodies.
pub type HookResult = Result<(), BoxError>;

/// Hook run once before any worker is forked.
pub type SetupHook = Box<dyn FnMut(&mut SetupContext<'_>) -> HookResult>;

/// Hook run around each fork.
pub type ForkHook = Box<dyn FnMut() -> HookResult>;

/// Hook run once while shutting down, on a helper thread.
pub type TeardownHook = Box<dyn FnOnce(TeardownContext) -> HookResult + Send>;

/// Identifies an extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Once per process image, before the pool is forked.
    Setup,
    /// Once while shutting down, bounded by the teardown timeout.
    Teardown,
    /// In the supervisor, immediately before each fork.
    BeforeFork,
    /// In each child, as its first action.
    AfterFork,
    /// Application preload; placement depends on `preload_app`.
    BeforeFirstFork,
}

impl HookKind {
    /// Stable name used in logs and in the `DROVER_HOOK` variable.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Teardown => "teardown",
            Self::BeforeFork => "before_fork",
            Self::AfterFork => "after_fork",
            Self::BeforeFirstFork => "before_first_fork",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Handle given to the `setup` hook.
///
/// Setup runs before anything is forked, so changes made to the pool
/// settings here decide how many workers start and what they consume.
#[derive(Debug)]
pub struct SetupContext<'a> {
    pid: Pid,
    settings: &'a mut PoolSettings,
}

impl<'a> SetupContext<'a> {
    pub(crate) fn new(pid: Pid, settings: &'a mut PoolSettings) -> Self {
        Self { pid, settings }
    }

    /// PID of the supervisor.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Pool settings that will be used for forking.
    pub fn settings(&self) -> &PoolSettings {
        self.settings
    }

    /// Mutable access to the pool settings.
    pub fn settings_mut(&mut self) -> &mut PoolSettings {
        self.settings
    }
}

/// Snapshot given to the `teardown` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownContext {
    pid: Pid,
    graceful: bool,
    workers_stopped: usize,
}

impl TeardownContext {
    pub(crate) fn new(pid: Pid, graceful: bool, workers_stopped: usize) -> Self {
        Self {
            pid,
            graceful,
            workers_stopped,
        }
    }

    /// PID of the supervisor.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether workers were asked to finish their current job.
    pub fn graceful(&self) -> bool {
        self.graceful
    }

    /// Number of pool entries signalled during the stop.
    pub fn workers_stopped(&self) -> usize {
        self.workers_stopped
    }
}

/// The set of configured hooks.
#[derive(Default)]
pub struct Hooks {
    setup: Option<SetupHook>,
    teardown: Option<TeardownHook>,
    before_fork: Option<ForkHook>,
    after_fork: Option<ForkHook>,
    before_first_fork: Option<ForkHook>,
}

impl Hooks {
    /// No hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `setup` hook.
    #[must_use]
    pub fn with_setup<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut SetupContext<'_>) -> HookResult + 'static,
    {
        self.setup = Some(Box::new(hook));
        self
    }

    /// Sets the `teardown` hook.
    #[must_use]
    pub fn with_teardown<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(TeardownContext) -> HookResult + Send + 'static,
    {
        self.teardown = Some(Box::new(hook));
        self
    }

    /// Sets the `before_fork` hook.
    #[must_use]
    pub fn with_before_fork<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> HookResult + 'static,
    {
        self.before_fork = Some(Box::new(hook));
        self
    }

    /// Sets the `after_fork` hook.
    #[must_use]
    pub fn with_after_fork<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> HookResult + 'static,
    {
        self.after_fork = Some(Box::new(hook));
        self
    }

    /// Sets the `before_first_fork` hook.
    #[must_use]
    pub fn with_before_first_fork<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> HookResult + 'static,
    {
        self.before_first_fork = Some(Box::new(hook));
        self
    }

    /// Whether the given hook is configured.
    pub fn is_set(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::Setup => self.setup.is_some(),
            HookKind::Teardown => self.teardown.is_some(),
            HookKind::BeforeFork => self.before_fork.is_some(),
            HookKind::AfterFork => self.after_fork.is_some(),
            HookKind::BeforeFirstFork => self.before_first_fork.is_some(),
        }
    }

    /// Runs `setup`; `None` when it is not configured.
    pub(crate) fn run_setup(
        &mut self,
        context: &mut SetupContext<'_>,
    ) -> Option<Result<(), HookError>> {
        let hook = self.setup.as_mut()?;
        Some(invoke_guarded(HookKind::Setup, || hook(context)))
    }

    /// Runs one of the argument-free fork hooks; `None` when it is not
    /// configured.
    pub(crate) fn run_fork_hook(&mut self, kind: HookKind) -> Option<Result<(), HookError>> {
        let hook = match kind {
            HookKind::BeforeFork => self.before_fork.as_mut(),
            HookKind::AfterFork => self.after_fork.as_mut(),
            HookKind::BeforeFirstFork => self.before_first_fork.as_mut(),
            HookKind::Setup | HookKind::Teardown => None,
        }?;
        Some(invoke_guarded(kind, hook))
    }

    /// Removes the teardown hook; it can only run once.
    pub(crate) fn take_teardown(&mut self) -> Option<TeardownHook> {
        self.teardown.take()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Hooks")
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .field("before_fork", &self.before_fork.is_some())
            .field("after_fork", &self.after_fork.is_some())
            .field("before_first_fork", &self.before_first_fork.is_some())
            .finish()
    }
}

/// Errors produced by hook invocation.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook returned an error.
    #[error("{hook} hook failed: {source}")]
    Failed {
        /// Hook that failed.
        hook: HookKind,
        /// Error returned by the hook body.
        #[source]
        source: BoxError,
    },
    /// The hook panicked.
    #[error("{hook} hook panicked: {message}")]
    Panicked {
        /// Hook that panicked.
        hook: HookKind,
        /// Panic payload rendered as text.
        message: String,
    },
    /// The helper thread running the hook could not be started.
    #[error("failed to start {hook} hook thread: {source}")]
    Thread {
        /// Hook that could not run.
        hook: HookKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl HookError {
    /// Hook the error originated from.
    pub fn hook(&self) -> HookKind {
        match self {
            Self::Failed { hook, .. } | Self::Panicked { hook, .. } | Self::Thread { hook, .. } => {
                *hook
            }
        }
    }
}

/// Runs a hook body, converting errors and panics into [`HookError`].
pub(crate) fn invoke_guarded<F>(hook: HookKind, body: F) -> Result<(), HookError>
where
    F: FnOnce() -> HookResult,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(HookError::Failed { hook, source }),
        Err(payload) => Err(HookError::Panicked {
            hook,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
