//! Working directory, umask and standard streams of a daemon.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use camino::Utf8Path;
use nix::sys::stat::{Mode, umask};
use nix::unistd::{chdir, dup2};

use drover_config::NULL_DEVICE;

use super::daemonizer::DaemonizeError;
use super::paths::DaemonPaths;

const LOG_FILE_MODE: u32 = 0o644;

/// Changes into the runpath, clears the umask and points the standard
/// streams at the null device and the configured log files.
///
/// Output files are opened in append mode so several generations of the
/// daemon share one log.
pub(crate) fn enter_daemon_environment(paths: &DaemonPaths) -> Result<(), DaemonizeError> {
    if let Some(runpath) = paths.runpath() {
        chdir(runpath.as_std_path()).map_err(|source| DaemonizeError::Runpath {
            path: runpath.to_owned(),
            source,
        })?;
    }
    umask(Mode::empty());

    let stdin = File::open(NULL_DEVICE).map_err(|source| DaemonizeError::Stream {
        path: Utf8Path::new(NULL_DEVICE).to_owned(),
        source,
    })?;
    replace(&stdin, libc::STDIN_FILENO, Utf8Path::new(NULL_DEVICE))?;

    // Anything still buffered belongs to the old destination.
    io::stdout().flush().ok();
    io::stderr().flush().ok();
    redirect_output(paths.stdout(), libc::STDOUT_FILENO)?;
    redirect_output(paths.stderr(), libc::STDERR_FILENO)?;
    Ok(())
}

fn redirect_output(path: &Utf8Path, target: RawFd) -> Result<(), DaemonizeError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(LOG_FILE_MODE)
        .open(path)
        .map_err(|source| DaemonizeError::Stream {
            path: path.to_owned(),
            source,
        })?;
    replace(&file, target, path)
}

fn replace(file: &File, target: RawFd, path: &Utf8Path) -> Result<(), DaemonizeError> {
    dup2(file.as_raw_fd(), target).map_err(|source| DaemonizeError::Stream {
        path: path.to_owned(),
        source: io::Error::from(source),
    })?;
    Ok(())
}
