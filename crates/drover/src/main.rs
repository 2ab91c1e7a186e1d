//! Command-line entry point: supervises shell-command workers.

use std::error::Error;
use std::io::{self, Write};
use std::process::ExitCode;

use drover::{CommandApplication, LaunchOutcome, ReadinessReport};

fn main() -> ExitCode {
    match drover::run(CommandApplication) {
        Ok(LaunchOutcome::Exited { .. }) => ExitCode::SUCCESS,
        Ok(LaunchOutcome::Detached(report)) => relay(&report),
        Err(error) => fail(&error),
    }
}

/// Echoes the daemon's report; only a ready daemon is a successful launch.
fn relay(report: &ReadinessReport) -> ExitCode {
    if report.is_ready() {
        writeln!(io::stdout(), "{report}").ok();
        ExitCode::SUCCESS
    } else {
        writeln!(io::stderr(), "{report}").ok();
        ExitCode::FAILURE
    }
}

fn fail(error: &dyn Error) -> ExitCode {
    writeln!(io::stderr(), "drover: {error}").ok();
    ExitCode::FAILURE
}
