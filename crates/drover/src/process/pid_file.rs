//! The PID file written once the supervisor is ready.
//!
//! Removal happens on drop. A successful `execve` runs no destructors, so a
//! reincarnated image inherits the file untouched and rewrites it with the
//! same PID.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::LaunchError;

const PID_FILE_MODE: u32 = 0o644;

/// A written PID file, removed again when dropped.
#[derive(Debug)]
pub(crate) struct PidFile {
    path: Utf8PathBuf,
}

impl PidFile {
    /// Truncates or creates `path` and writes `pid` followed by a newline.
    pub(crate) fn create(path: &Utf8Path, pid: Pid) -> Result<Self, LaunchError> {
        let pid_write = |source| LaunchError::PidWrite {
            path: path.to_owned(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(PID_FILE_MODE)
            .open(path)
            .map_err(pid_write)?;
        writeln!(file, "{pid}").map_err(pid_write)?;
        file.sync_all().map_err(pid_write)?;
        info!(
            target: PROCESS_TARGET,
            pid = pid.as_raw(),
            file = %path,
            "pid file written"
        );
        Ok(Self {
            path: path.to_owned(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: PROCESS_TARGET,
                    file = %self.path,
                    error = %error,
                    "failed to remove pid file"
                );
            }
            _ => {}
        }
    }
}
