//! Test doubles shared by the supervisor and launch suites.

mod process_control;
mod signals;
mod worker;

pub(crate) use process_control::FakeProcessControl;
pub(crate) use signals::{ScriptedSignalInstaller, ScriptedSignals};
pub(crate) use worker::RecordingWorker;
