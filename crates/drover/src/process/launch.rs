//! Sequences configuration, detachment, telemetry and the supervisor loop.

use std::env;
use std::sync::Arc;

use nix::unistd::Pid;
use ortho_config::{OrthoConfig, OrthoError};
use tracing::{error, info, warn};

use drover_config::Config;

use crate::hooks::{Hooks, command_hooks};
use crate::supervisor::signals::{SignalInstaller, SystemSignalInstaller};
use crate::supervisor::{
    PoolSettings, ProcessControl, Supervisor, SupervisorOutcome, SystemProcessControl,
    error_chain,
};
use crate::telemetry;
use crate::worker::{CommandWorker, WorkerEntry};

use super::daemonizer::{Daemonizer, Detached, SystemDaemonizer};
use super::errors::LaunchError;
use super::paths::DaemonPaths;
use super::pid_file::PidFile;
use super::readiness::ReadinessReport;
use super::reexec::{ImageReplacer, ReexecCommand, SystemImageReplacer};
use super::streams::enter_daemon_environment;
use super::{PROCESS_TARGET, REINCARNATION_ENV_VAR};

/// How this process image was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Stay attached to the terminal.
    Foreground,
    /// Detach through the double fork.
    Background,
    /// A re-executed image; the PID must not change, so it never forks to
    /// detach. A daemon re-applies its runpath, umask and streams.
    Reincarnated {
        /// Whether the configuration asks for a daemon.
        daemon: bool,
    },
}

impl LaunchMode {
    fn resolve(reincarnated: bool, config: &Config) -> Self {
        match (reincarnated, config.daemon()) {
            (true, daemon) => Self::Reincarnated { daemon },
            (false, true) => Self::Background,
            (false, false) => Self::Foreground,
        }
    }
}

/// Source of the resolved configuration.
pub trait ConfigLoader {
    /// Loads the supervisor configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration built in code.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already-resolved configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// The program being supervised: its hooks and its worker entry point.
pub trait Application {
    /// Code run inside each worker.
    type Worker: WorkerEntry;

    /// Builds the hooks and worker for a resolved configuration.
    fn prepare(&self, config: &Config) -> Result<(Hooks, Self::Worker), LaunchError>;
}

/// Application whose hooks and worker are shell commands from the
/// configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandApplication;

impl Application for CommandApplication {
    type Worker = CommandWorker;

    fn prepare(&self, config: &Config) -> Result<(Hooks, Self::Worker), LaunchError> {
        let command = config
            .worker_command
            .as_deref()
            .filter(|command| !command.trim().is_empty())
            .ok_or_else(|| LaunchError::Application {
                message: "worker_command must be set".to_owned(),
            })?;
        Ok((command_hooks(config), CommandWorker::new(command)))
    }
}

/// How a launch ended for this process.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// This is the launching process; the daemon reported back.
    Detached(ReadinessReport),
    /// The supervisor stopped and the process should exit.
    Exited {
        /// Whether workers were stopped gracefully.
        graceful: bool,
    },
}

/// Process-level collaborators.
pub(crate) struct ProcessDeps<D, I, C, R> {
    pub(crate) reincarnated: bool,
    pub(crate) daemonizer: D,
    pub(crate) signals: I,
    pub(crate) control: C,
    pub(crate) images: R,
}

/// Service dependencies.
pub(crate) struct ServiceDeps<L, A> {
    pub(crate) loader: L,
    pub(crate) application: A,
}

/// Collaborators required to launch the supervisor.
pub(crate) struct LaunchPlan<L, A, D, I, C, R> {
    pub(crate) process: ProcessDeps<D, I, C, R>,
    pub(crate) services: ServiceDeps<L, A>,
}

/// Runs `application` under the supervisor using the production
/// collaborators.
pub fn run<A: Application>(application: A) -> Result<LaunchOutcome, LaunchError> {
    let plan = LaunchPlan {
        process: ProcessDeps {
            reincarnated: env::var_os(REINCARNATION_ENV_VAR).is_some(),
            daemonizer: SystemDaemonizer::new(),
            signals: SystemSignalInstaller,
            control: SystemProcessControl,
            images: SystemImageReplacer,
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            application,
        },
    };
    run_with(plan)
}

/// Runs the supervisor with injected collaborators.
pub(crate) fn run_with<L, A, D, I, C, R>(
    plan: LaunchPlan<L, A, D, I, C, R>,
) -> Result<LaunchOutcome, LaunchError>
where
    L: ConfigLoader,
    A: Application,
    D: Daemonizer,
    I: SignalInstaller,
    C: ProcessControl,
    R: ImageReplacer,
{
    let LaunchPlan { process, services } = plan;
    let ProcessDeps {
        reincarnated,
        daemonizer,
        signals,
        control,
        images,
    } = process;
    let ServiceDeps {
        loader,
        application,
    } = services;

    let config = loader.load()?;
    config.validate()?;
    let settings = PoolSettings::from_config(&config)?;
    let (hooks, worker) = application.prepare(&config)?;
    let reexec = ReexecCommand::capture()?;
    let paths = DaemonPaths::from_config(&config);

    let mode = LaunchMode::resolve(reincarnated, &config);
    let notifier = match mode {
        LaunchMode::Background => match daemonizer.daemonize(&paths)? {
            Detached::Origin(report) => return Ok(LaunchOutcome::Detached(report)),
            Detached::Daemon(notifier) => Some(notifier),
        },
        LaunchMode::Reincarnated { daemon: true } => {
            enter_daemon_environment(&paths)?;
            None
        }
        LaunchMode::Foreground | LaunchMode::Reincarnated { daemon: false } => None,
    };

    let (mut source, pid_file) = match start_services(&config, &signals) {
        Ok(started) => started,
        Err(error) => {
            if let Some(notifier) = notifier {
                notifier.fail(&error).ok();
            }
            return Err(error);
        }
    };
    let pid = Pid::this();
    if let Some(notifier) = notifier
        && let Err(error) = notifier.ready(pid)
    {
        warn!(
            target: PROCESS_TARGET,
            error = %error,
            "failed to report readiness to the launching process"
        );
    }
    info!(
        target: PROCESS_TARGET,
        pid = pid.as_raw(),
        ?mode,
        "supervisor ready"
    );

    let mut supervisor = Supervisor::new(settings.clone(), hooks, worker, control);
    loop {
        match supervisor.run(&mut source) {
            SupervisorOutcome::Exit { graceful } => {
                drop(pid_file);
                info!(target: PROCESS_TARGET, graceful, "supervisor exiting");
                return Ok(LaunchOutcome::Exited { graceful });
            }
            SupervisorOutcome::Reincarnate => {
                info!(
                    target: PROCESS_TARGET,
                    program = %reexec.program().display(),
                    args = ?reexec.args(),
                    "reincarnating"
                );
                // Only returns when `execve` failed; the pid file still names
                // this process, so the pool is restarted in this image.
                let failure = images.replace(&reexec);
                error!(
                    target: PROCESS_TARGET,
                    error = %error_chain(&failure),
                    "reincarnation failed; restarting the worker pool in this image"
                );
                let (hooks, worker) = application.prepare(&config)?;
                supervisor.reload(settings.clone(), hooks, worker);
            }
        }
    }
}

/// Everything that must succeed before readiness is reported. Signals are
/// intercepted before the PID file appears, so a signal sent to a PID read
/// from that file is never lost.
fn start_services<I: SignalInstaller>(
    config: &Config,
    signals: &I,
) -> Result<(I::Source, Option<PidFile>), LaunchError> {
    telemetry::initialise(config)?;
    let source = signals.install()?;
    let pid_file = config
        .pid_path()
        .map(|path| PidFile::create(path, Pid::this()))
        .transpose()?;
    Ok((source, pid_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(false, false, LaunchMode::Foreground)]
    #[case(false, true, LaunchMode::Background)]
    #[case(true, false, LaunchMode::Reincarnated { daemon: false })]
    #[case(true, true, LaunchMode::Reincarnated { daemon: true })]
    fn launch_mode_follows_marker_and_daemon_flag(
        #[case] reincarnated: bool,
        #[case] daemon: bool,
        #[case] expected: LaunchMode,
    ) {
        let config = Config {
            daemon: Some(daemon),
            ..Config::default()
        };
        assert_eq!(LaunchMode::resolve(reincarnated, &config), expected);
    }

    #[rstest]
    #[case(None)]
    #[case(Some("   "))]
    fn command_application_rejects_missing_worker(#[case] command: Option<&str>) {
        let config = Config {
            worker_command: command.map(str::to_owned),
            ..Config::default()
        };
        assert!(matches!(
            CommandApplication.prepare(&config),
            Err(LaunchError::Application { .. })
        ));
    }
}
