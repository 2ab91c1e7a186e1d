//! Filesystem locations used while detaching.

use camino::{Utf8Path, Utf8PathBuf};

use drover_config::Config;

/// Paths the daemon environment is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    runpath: Option<Utf8PathBuf>,
    stdout: Utf8PathBuf,
    stderr: Utf8PathBuf,
}

impl DaemonPaths {
    /// Resolves the paths, falling back to the null device for output
    /// streams that are not configured.
    pub fn from_config(config: &Config) -> Self {
        Self {
            runpath: config.runpath.clone(),
            stdout: config.stdout_path_or_default(),
            stderr: config.stderr_path_or_default(),
        }
    }

    /// Working directory; `None` keeps the current one.
    pub fn runpath(&self) -> Option<&Utf8Path> {
        self.runpath.as_deref()
    }

    /// Destination for standard output.
    pub fn stdout(&self) -> &Utf8Path {
        &self.stdout
    }

    /// Destination for standard error and the log.
    pub fn stderr(&self) -> &Utf8Path {
        &self.stderr
    }
}
