//! Double-fork detachment with a readiness pipe back to the launcher.

use std::io;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, fork, pipe, setsid};
use thiserror::Error;

use super::paths::DaemonPaths;
use super::readiness::{ReadinessListener, ReadinessNotifier, ReadinessReport};
use super::streams::enter_daemon_environment;

/// Which side of the detachment the caller ended up on.
#[derive(Debug)]
pub enum Detached {
    /// The detached daemon; it must report readiness through the notifier.
    Daemon(ReadinessNotifier),
    /// The launching process, holding what the daemon reported.
    Origin(ReadinessReport),
}

/// Abstraction over daemonisation strategies.
pub trait Daemonizer {
    /// Detaches the process into the background.
    fn daemonize(&self, paths: &DaemonPaths) -> Result<Detached, DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The readiness pipe could not be created.
    #[error("failed to create readiness pipe: {source}")]
    Pipe {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Forking failed.
    #[error("failed to fork: {source}")]
    Fork {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Starting a new session failed.
    #[error("failed to start a new session: {source}")]
    Session {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The runpath could not be entered.
    #[error("failed to change into runpath '{path}': {source}")]
    Runpath {
        /// Configured runpath.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// A standard stream could not be redirected.
    #[error("failed to redirect a standard stream to '{path}': {source}")]
    Stream {
        /// File the stream was pointed at.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The launcher could not read the daemon's report.
    #[error("failed to read daemon readiness: {source}")]
    Readiness {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Daemoniser built on `fork`, `setsid` and a pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    pub fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &DaemonPaths) -> Result<Detached, DaemonizeError> {
        let (read, write) = pipe().map_err(|source| DaemonizeError::Pipe { source })?;
        // SAFETY: called before telemetry or any other thread is started.
        match unsafe { fork() }.map_err(|source| DaemonizeError::Fork { source })? {
            ForkResult::Parent { child } => {
                drop(write);
                let report = ReadinessListener::new(read)
                    .wait()
                    .map_err(|source| DaemonizeError::Readiness { source })?;
                // The intermediate process exits straight after forking.
                waitpid(child, None).ok();
                Ok(Detached::Origin(report))
            }
            ForkResult::Child => {
                drop(read);
                let notifier = ReadinessNotifier::new(write);
                match detach(paths) {
                    Ok(()) => Ok(Detached::Daemon(notifier)),
                    Err(error) => {
                        notifier.fail(&error).ok();
                        exit_now(1)
                    }
                }
            }
        }
    }
}

/// Runs in the first child: new session, second fork, daemon environment.
/// Only the grandchild returns.
fn detach(paths: &DaemonPaths) -> Result<(), DaemonizeError> {
    setsid().map_err(|source| DaemonizeError::Session { source })?;
    // SAFETY: the first child is single-threaded.
    match unsafe { fork() }.map_err(|source| DaemonizeError::Fork { source })? {
        ForkResult::Parent { .. } => exit_now(0),
        ForkResult::Child => enter_daemon_environment(paths),
    }
}

fn exit_now(code: i32) -> ! {
    // SAFETY: `_exit` skips destructors and atexit handlers that belong to
    // the launching process.
    unsafe { libc::_exit(code) }
}
