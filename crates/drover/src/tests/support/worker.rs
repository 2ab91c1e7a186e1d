use std::sync::{Arc, Mutex, PoisonError};

use crate::BoxError;
use crate::worker::{WorkerAssignment, WorkerEntry};

/// Records every assignment it is run with.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingWorker {
    runs: Arc<Mutex<Vec<WorkerAssignment>>>,
    failing: bool,
}

impl RecordingWorker {
    /// A worker whose entry point returns an error.
    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn runs(&self) -> Vec<WorkerAssignment> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WorkerEntry for RecordingWorker {
    fn run(&self, assignment: &WorkerAssignment) -> Result<(), BoxError> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(assignment.clone());
        if self.failing {
            Err("queue backend unavailable".into())
        } else {
            Ok(())
        }
    }
}
