//! Hooks backed by shell commands, used by the `drover` binary.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus};

use nix::unistd::Pid;
use thiserror::Error;

use drover_config::Config;

use super::{HookKind, Hooks};
use crate::supervisor::signals;

/// Interpreter used for configured commands.
pub(crate) const SHELL: &str = "/bin/sh";

/// A hook that runs `sh -c <command>` and waits for it.
///
/// The command sees `DROVER_HOOK` (the hook name) and `DROVER_PID` (the PID
/// of the process running the hook) in its environment. A non-zero exit
/// status is a hook failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHook {
    kind: HookKind,
    command: String,
}

impl CommandHook {
    /// Builds a hook for the given extension point.
    pub fn new(kind: HookKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
        }
    }

    /// Runs the command to completion.
    pub fn run(&self) -> Result<(), CommandHookError> {
        let mut command = Command::new(SHELL);
        command
            .arg("-c")
            .arg(&self.command)
            .env("DROVER_HOOK", self.kind.as_str())
            .env("DROVER_PID", Pid::this().to_string());
        // SAFETY: the closure only calls sigprocmask, which is
        // async-signal-safe.
        unsafe {
            command.pre_exec(|| signals::restore_default_mask().map_err(io::Error::from));
        }
        let status = command.status().map_err(|source| CommandHookError::Spawn {
            command: self.command.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(CommandHookError::Status {
                command: self.command.clone(),
                status,
            })
        }
    }
}

/// Errors reported by [`CommandHook`].
#[derive(Debug, Error)]
pub enum CommandHookError {
    /// The shell could not be started.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        /// Configured command line.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The command exited unsuccessfully.
    #[error("`{command}` finished with {status}")]
    Status {
        /// Configured command line.
        command: String,
        /// Exit status reported by the shell.
        status: ExitStatus,
    },
}

/// Builds [`Hooks`] from the `*_command` settings.
pub fn command_hooks(config: &Config) -> Hooks {
    let mut hooks = Hooks::new();
    if let Some(command) = &config.setup_command {
        let hook = CommandHook::new(HookKind::Setup, command.as_str());
        hooks = hooks.with_setup(move |_| hook.run().map_err(Into::into));
    }
    if let Some(command) = &config.teardown_command {
        let hook = CommandHook::new(HookKind::Teardown, command.as_str());
        hooks = hooks.with_teardown(move |_| hook.run().map_err(Into::into));
    }
    if let Some(command) = &config.before_fork_command {
        let hook = CommandHook::new(HookKind::BeforeFork, command.as_str());
        hooks = hooks.with_before_fork(move || hook.run().map_err(Into::into));
    }
    if let Some(command) = &config.after_fork_command {
        let hook = CommandHook::new(HookKind::AfterFork, command.as_str());
        hooks = hooks.with_after_fork(move || hook.run().map_err(Into::into));
    }
    if let Some(command) = &config.before_first_fork_command {
        let hook = CommandHook::new(HookKind::BeforeFirstFork, command.as_str());
        hooks = hooks.with_before_first_fork(move || hook.run().map_err(Into::into));
    }
    hooks
}
