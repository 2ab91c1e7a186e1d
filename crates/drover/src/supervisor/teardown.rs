//! Time-bounded execution of the teardown hook.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::hooks::{HookError, HookKind, TeardownContext, TeardownHook, invoke_guarded};

/// Result of a bounded teardown.
#[derive(Debug)]
pub enum TeardownOutcome {
    /// The hook returned successfully.
    Completed,
    /// The hook returned an error, panicked or could not start.
    Failed(HookError),
    /// The hook was still running when the timeout elapsed.
    TimedOut,
    /// No teardown hook was configured.
    Skipped,
}

impl TeardownOutcome {
    /// Whether shutdown may proceed without reporting a problem.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Runs `hook` on a helper thread and waits at most `timeout` for it.
///
/// A hook that overruns is abandoned: its thread keeps running detached and
/// dies with the process image.
pub(crate) fn run_bounded(
    hook: Option<TeardownHook>,
    context: TeardownContext,
    timeout: Duration,
) -> TeardownOutcome {
    let Some(hook) = hook else {
        return TeardownOutcome::Skipped;
    };
    let (sender, receiver) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("drover-teardown".to_owned())
        .spawn(move || {
            let result = invoke_guarded(HookKind::Teardown, move || hook(context));
            // The receiver is gone once the timeout has elapsed.
            sender.send(result).ok();
        });
    if let Err(source) = spawned {
        return TeardownOutcome::Failed(HookError::Thread {
            hook: HookKind::Teardown,
            source,
        });
    }
    match receiver.recv_timeout(timeout) {
        Ok(Ok(())) => TeardownOutcome::Completed,
        Ok(Err(error)) => TeardownOutcome::Failed(error),
        Err(mpsc::RecvTimeoutError::Timeout) => TeardownOutcome::TimedOut,
        Err(mpsc::RecvTimeoutError::Disconnected) => TeardownOutcome::Failed(HookError::Panicked {
            hook: HookKind::Teardown,
            message: "teardown thread exited without reporting".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use nix::unistd::Pid;

    use super::*;

    fn context() -> TeardownContext {
        TeardownContext::new(Pid::this(), true, 0)
    }

    fn boxed<F>(hook: F) -> Option<TeardownHook>
    where
        F: FnOnce(TeardownContext) -> crate::HookResult + Send + 'static,
    {
        Some(Box::new(hook))
    }

    #[test]
    fn missing_hook_is_skipped() {
        let outcome = run_bounded(None, context(), Duration::from_secs(1));
        assert!(matches!(outcome, TeardownOutcome::Skipped));
        assert!(outcome.is_clean());
    }

    #[test]
    fn completed_hook_reports_completion() {
        let outcome = run_bounded(boxed(|_| Ok(())), context(), Duration::from_secs(5));
        assert!(matches!(outcome, TeardownOutcome::Completed));
    }

    #[test]
    fn failing_hook_reports_the_error() {
        let outcome = run_bounded(
            boxed(|_| Err("flush failed".into())),
            context(),
            Duration::from_secs(5),
        );
        match outcome {
            TeardownOutcome::Failed(error) => assert_eq!(error.hook(), HookKind::Teardown),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn slow_hook_is_abandoned_at_the_timeout() {
        let started = Instant::now();
        let outcome = run_bounded(
            boxed(|_| {
                thread::sleep(Duration::from_secs(5));
                Ok(())
            }),
            context(),
            Duration::from_millis(100),
        );
        assert!(matches!(outcome, TeardownOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
