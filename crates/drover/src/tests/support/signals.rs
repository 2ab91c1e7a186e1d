use std::collections::VecDeque;

use crate::supervisor::signals::SignalInstaller;
use crate::supervisor::{SignalError, SignalSource, SupervisorEvent};

/// Replays a fixed list of events.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedSignals {
    events: VecDeque<SupervisorEvent>,
}

impl ScriptedSignals {
    pub(crate) fn new(events: impl IntoIterator<Item = SupervisorEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }
}

impl SignalSource for ScriptedSignals {
    fn next_event(&mut self) -> Result<SupervisorEvent, SignalError> {
        match self.events.pop_front() {
            Some(event) => Ok(event),
            None => panic!("signal script exhausted; end every script with a stop event"),
        }
    }
}

/// Hands out a [`ScriptedSignals`] instead of touching the signal mask.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedSignalInstaller {
    script: ScriptedSignals,
}

impl ScriptedSignalInstaller {
    pub(crate) fn new(events: impl IntoIterator<Item = SupervisorEvent>) -> Self {
        Self {
            script: ScriptedSignals::new(events),
        }
    }
}

impl SignalInstaller for ScriptedSignalInstaller {
    type Source = ScriptedSignals;

    fn install(&self) -> Result<Self::Source, SignalError> {
        Ok(self.script.clone())
    }
}
