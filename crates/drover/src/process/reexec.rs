//! Replacing the process image for a reincarnation.

use std::convert::Infallible;
use std::env;
use std::ffi::{CString, NulError, OsString};
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::execve;
use thiserror::Error;

use super::REINCARNATION_ENV_VAR;

const DELETED_SUFFIX: &str = " (deleted)";

/// Everything needed to start the same program again under the same PID.
///
/// Captured before the daemon changes directory, so relative arguments keep
/// their meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReexecCommand {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: PathBuf,
}

impl ReexecCommand {
    /// Records the running executable, its arguments and the working
    /// directory.
    pub fn capture() -> Result<Self, ReexecError> {
        let program = env::current_exe().map_err(|source| ReexecError::Executable { source })?;
        let cwd = env::current_dir().map_err(|source| ReexecError::WorkingDirectory { source })?;
        Ok(Self::new(program, env::args_os().collect(), cwd))
    }

    pub(crate) fn new(program: PathBuf, args: Vec<OsString>, cwd: PathBuf) -> Self {
        Self {
            program: strip_deleted_suffix(program),
            args,
            cwd,
        }
    }

    /// Executable that will be started.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments, including `argv[0]`.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Replaces the current image. The new image sees the current
    /// environment plus the reincarnation marker. Only returns on failure.
    pub fn exec(&self) -> Result<Infallible, ReexecError> {
        let program = to_cstring(self.program.clone().into_os_string())?;
        let args = self
            .args
            .iter()
            .cloned()
            .map(to_cstring)
            .collect::<Result<Vec<_>, _>>()?;
        let environment = environment()
            .into_iter()
            .map(to_cstring)
            .collect::<Result<Vec<_>, _>>()?;
        let previous = env::current_dir().ok();
        env::set_current_dir(&self.cwd)
            .map_err(|source| ReexecError::WorkingDirectory { source })?;
        let Err(source) = execve(&program, &args, &environment);
        // The image survives, so it goes back to the directory it ran in.
        if let Some(previous) = previous {
            env::set_current_dir(previous).ok();
        }
        Err(ReexecError::Exec {
            program: self.program.clone(),
            source,
        })
    }
}

/// Replaces the running image with a [`ReexecCommand`].
pub trait ImageReplacer {
    /// Executes `command`; returns only when the replacement failed.
    fn replace(&self, command: &ReexecCommand) -> ReexecError;
}

/// [`ImageReplacer`] backed by `execve`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemImageReplacer;

impl ImageReplacer for SystemImageReplacer {
    fn replace(&self, command: &ReexecCommand) -> ReexecError {
        match command.exec() {
            Ok(never) => match never {},
            Err(error) => error,
        }
    }
}

/// Errors raised while preparing or performing a reincarnation.
#[derive(Debug, Error)]
pub enum ReexecError {
    /// The running executable could not be located.
    #[error("failed to locate the running executable: {source}")]
    Executable {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The launch directory could not be read or restored.
    #[error("failed to resolve the launch directory: {source}")]
    WorkingDirectory {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An argument or environment entry contained a NUL byte.
    #[error("argument contains an interior NUL byte: {source}")]
    Nul {
        /// Underlying conversion error.
        #[from]
        source: NulError,
    },
    /// `execve` failed.
    #[error("failed to execute '{}': {source}", program.display())]
    Exec {
        /// Program that could not be executed.
        program: PathBuf,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

fn environment() -> Vec<OsString> {
    env::vars_os()
        .filter(|(key, _)| key != REINCARNATION_ENV_VAR)
        .map(|(key, value)| {
            let mut entry = key;
            entry.push("=");
            entry.push(value);
            entry
        })
        .chain(std::iter::once(OsString::from(format!(
            "{REINCARNATION_ENV_VAR}=1"
        ))))
        .collect()
}

fn to_cstring(value: OsString) -> Result<CString, ReexecError> {
    Ok(CString::new(value.into_vec())?)
}

/// Linux reports a replaced binary as `/path/to/drover (deleted)`; the new
/// binary lives at the original path.
fn strip_deleted_suffix(program: PathBuf) -> PathBuf {
    match program.to_str().and_then(|path| path.strip_suffix(DELETED_SUFFIX)) {
        Some(stripped) => PathBuf::from(stripped),
        None => program,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_binaries_resolve_to_the_original_path() {
        let command = ReexecCommand::new(
            PathBuf::from("/usr/local/bin/drover (deleted)"),
            vec![OsString::from("drover")],
            PathBuf::from("/"),
        );
        assert_eq!(command.program(), Path::new("/usr/local/bin/drover"));
    }

    #[test]
    fn environment_marks_the_reincarnation_once() {
        let marked = environment()
            .into_iter()
            .filter(|entry| {
                entry
                    .to_str()
                    .is_some_and(|text| text.starts_with(REINCARNATION_ENV_VAR))
            })
            .count();
        assert_eq!(marked, 1);
    }

    #[test]
    fn interior_nul_is_rejected() {
        let command = ReexecCommand::new(
            PathBuf::from("/bin/true"),
            vec![OsString::from("bad\0arg")],
            PathBuf::from("/"),
        );
        assert!(matches!(command.exec(), Err(ReexecError::Nul { .. })));
    }

    #[test]
    fn missing_programs_fail_and_keep_the_working_directory() {
        let before = env::current_dir().expect("read working directory");
        let command = ReexecCommand::new(
            PathBuf::from("/nonexistent/drover"),
            vec![OsString::from("drover")],
            PathBuf::from("/"),
        );
        let error = SystemImageReplacer.replace(&command);
        assert!(matches!(
            error,
            ReexecError::Exec {
                source: Errno::ENOENT,
                ..
            }
        ));
        assert_eq!(env::current_dir().expect("read working directory"), before);
    }
}
