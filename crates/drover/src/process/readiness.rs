//! Readiness handshake between the daemon and the process that launched it.
//!
//! The daemon writes a single report into a pipe the launching process reads
//! to end-of-file:
//!
//! ```text
//! ready 4242
//! ```
//!
//! or, on failure,
//!
//! ```text
//! error: failed to enter daemon environment
//! caused by: No such file or directory
//! ```
//!
//! End-of-file without a report means the daemon died before it could say
//! anything and is treated as a failure.

use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;

use nix::unistd::Pid;

const READY_PREFIX: &str = "ready ";
const ERROR_PREFIX: &str = "error: ";
const CAUSE_PREFIX: &str = "caused by: ";

/// What the launching process learned from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessReport {
    /// The daemon finished starting.
    Ready {
        /// PID of the daemon.
        pid: Pid,
    },
    /// The daemon reported a startup failure.
    Failed {
        /// Error message followed by its causes, one per line.
        message: String,
    },
    /// The pipe closed without a report.
    Silent,
}

impl ReadinessReport {
    /// Whether the daemon reported success.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Interprets everything read from the pipe.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Silent;
        }
        if let Some(pid) = trimmed
            .strip_prefix(READY_PREFIX)
            .and_then(|value| value.trim().parse::<i32>().ok())
        {
            return Self::Ready {
                pid: Pid::from_raw(pid),
            };
        }
        let message = trimmed
            .strip_prefix(ERROR_PREFIX)
            .unwrap_or(trimmed)
            .to_owned();
        Self::Failed { message }
    }
}

impl fmt::Display for ReadinessReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { pid } => write!(formatter, "drover started with pid {pid}"),
            Self::Failed { message } => write!(formatter, "drover failed to start: {message}"),
            Self::Silent => formatter.write_str("daemon exited before reporting readiness"),
        }
    }
}

/// Daemon-side end of the readiness pipe.
///
/// Dropping the notifier closes the pipe, so the launching process never
/// waits on a daemon that has gone away.
#[derive(Debug)]
pub struct ReadinessNotifier {
    pipe: File,
}

impl ReadinessNotifier {
    pub(crate) fn new(fd: OwnedFd) -> Self {
        Self {
            pipe: File::from(fd),
        }
    }

    /// Reports a successful start and closes the pipe.
    pub fn ready(mut self, pid: Pid) -> io::Result<()> {
        writeln!(self.pipe, "{READY_PREFIX}{pid}")?;
        self.pipe.flush()
    }

    /// Reports a startup failure with its cause chain and closes the pipe.
    pub fn fail(mut self, error: &dyn Error) -> io::Result<()> {
        self.pipe.write_all(render_failure(error).as_bytes())?;
        self.pipe.flush()
    }
}

/// Launcher-side end of the readiness pipe.
#[derive(Debug)]
pub struct ReadinessListener {
    pipe: File,
}

impl ReadinessListener {
    pub(crate) fn new(fd: OwnedFd) -> Self {
        Self {
            pipe: File::from(fd),
        }
    }

    /// Reads until the daemon closes its end.
    pub fn wait(mut self) -> io::Result<ReadinessReport> {
        let mut raw = String::new();
        self.pipe.read_to_string(&mut raw)?;
        Ok(ReadinessReport::parse(&raw))
    }
}

/// One line per error in the chain, skipping causes whose text the previous
/// line already ends with.
fn render_failure(error: &dyn Error) -> String {
    let mut previous = error.to_string();
    let mut rendered = format!("{ERROR_PREFIX}{previous}\n");
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !previous.ends_with(&text) {
            rendered.push_str(CAUSE_PREFIX);
            rendered.push_str(&text);
            rendered.push('\n');
        }
        previous = text;
        source = cause.source();
    }
    rendered
}
