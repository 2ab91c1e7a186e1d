//! Boundary between the supervisor and the job-processing code.
//!
//! A worker is whatever runs inside a forked child. The supervisor hands it a
//! [`WorkerAssignment`] and treats a normal return as exit status 0 and an
//! error as exit status 1.

use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;

use drover_config::Partition;

use crate::BoxError;
use crate::hooks::command::SHELL;

/// What one worker process is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerAssignment {
    index: usize,
    partition: Partition,
    interval: Duration,
}

impl WorkerAssignment {
    /// Builds an assignment for the worker at `index` in the workload.
    pub fn new(index: usize, partition: Partition, interval: Duration) -> Self {
        Self {
            index,
            partition,
            interval,
        }
    }

    /// Zero-based position of the partition within the workload.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Queues the worker consumes.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Code executed inside each forked worker.
///
/// Implementations typically loop until a signal tells them to stop. The
/// child's signal mask has already been restored when `run` is called, so
/// the default dispositions (or handlers the implementation installs) apply.
pub trait WorkerEntry {
    /// Processes jobs for the given assignment.
    fn run(&self, assignment: &WorkerAssignment) -> Result<(), BoxError>;
}

impl<F> WorkerEntry for F
where
    F: Fn(&WorkerAssignment) -> Result<(), BoxError>,
{
    fn run(&self, assignment: &WorkerAssignment) -> Result<(), BoxError> {
        self(assignment)
    }
}

/// Worker that replaces the child image with `sh -c <command>`.
///
/// The command receives `QUEUES` (comma-separated), `INTERVAL` (seconds) and
/// `DROVER_WORKER_INDEX`. Because the child execs, the command inherits the
/// child's PID and receives the signals the supervisor forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandWorker {
    command: String,
}

impl CommandWorker {
    /// Builds a worker for the given shell command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Configured shell command.
    pub fn command(&self) -> &str {
        &self.command
    }

    fn prepare(&self, assignment: &WorkerAssignment) -> Command {
        let mut command = Command::new(SHELL);
        command
            .arg("-c")
            .arg(&self.command)
            .env("QUEUES", assignment.partition().to_string())
            .env("INTERVAL", assignment.interval().as_secs_f64().to_string())
            .env("DROVER_WORKER_INDEX", assignment.index().to_string());
        command
    }
}

impl WorkerEntry for CommandWorker {
    fn run(&self, assignment: &WorkerAssignment) -> Result<(), BoxError> {
        // exec only returns on failure.
        let error = self.prepare(assignment).exec();
        Err(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;

    fn assignment() -> WorkerAssignment {
        let partition: Partition = "high,low".parse().expect("valid partition");
        WorkerAssignment::new(2, partition, Duration::from_millis(1500))
    }

    fn env_value<'a>(command: &'a Command, key: &str) -> Option<&'a OsStr> {
        command
            .get_envs()
            .find(|(name, _)| *name == OsStr::new(key))
            .and_then(|(_, value)| value)
    }

    #[test]
    fn command_environment_describes_the_assignment() {
        let worker = CommandWorker::new("exec my-worker");
        let command = worker.prepare(&assignment());
        assert_eq!(env_value(&command, "QUEUES"), Some(OsStr::new("high,low")));
        assert_eq!(env_value(&command, "INTERVAL"), Some(OsStr::new("1.5")));
        assert_eq!(
            env_value(&command, "DROVER_WORKER_INDEX"),
            Some(OsStr::new("2"))
        );
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, [OsStr::new("-c"), OsStr::new("exec my-worker")]);
    }

    #[test]
    fn closures_are_workers() {
        let worker = |assignment: &WorkerAssignment| -> Result<(), BoxError> {
            if assignment.partition().queues().len() == 2 {
                Ok(())
            } else {
                Err("unexpected partition".into())
            }
        };
        assert!(worker.run(&assignment()).is_ok());
    }
}
