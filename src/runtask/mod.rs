//! Task-run framework: a `Task` stepped repeatedly by a `Runner` until it finishes,
//! is stopped, is cancelled, or fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

/// Outcome of a single `Task::step` invocation.
pub enum StepOutcome<T, E> {
    /// Keep running; the runner will invoke `step` again (after `interval`, if set).
    Continue,
    /// The task is finished; no further steps are taken.
    Done(T),
    /// The step raised an error; `handle_exception` decides whether to continue or fail.
    Raised(E),
}

/// Unit of repeatable work driven by a `Runner`.
#[async_trait]
pub trait Task: Send {
    type Output: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn step(&mut self) -> StepOutcome<Self::Output, Self::Error>;

    /// Decide whether a raised error is recoverable. The default treats every error as fatal.
    async fn handle_exception(&mut self, err: Self::Error) -> Result<(), Self::Error> {
        Err(err)
    }

    /// Called once, after the runner observes a cancellation request. Must not raise.
    async fn on_cancelled(&mut self) {}

    /// Called once, after the runner observes a stop request. Must not raise.
    async fn on_stopped(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    New,
    Running,
    Completed,
    Stopped,
    Cancelled,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError<E: std::error::Error + Send + Sync + 'static> {
    #[error("runner was already started")]
    AlreadyRunning,
    #[error("runner was stopped before completion")]
    Stopped,
    #[error("runner was cancelled before completion")]
    Cancelled,
    #[error("task failed: {0}")]
    Failed(#[source] E),
}

type RunResult<T> = Result<<T as Task>::Output, RunnerError<<T as Task>::Error>>;

/// Drives a `Task` to completion on a background Tokio task, exposing cooperative
/// stop/cancel and a one-shot result. State machine: NEW -> RUNNING -> {COMPLETED,
/// STOPPED, CANCELLED, FAILED}.
pub struct Runner<T: Task> {
    task: Option<T>,
    state: Arc<Mutex<RunnerState>>,
    stop_requested: Arc<AtomicBool>,
    cancel_requested: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    done_notify: Arc<Notify>,
    result: Arc<Mutex<Option<RunResult<T>>>>,
}

impl<T: Task + 'static> Runner<T> {
    pub fn new(task: T) -> Self {
        Self {
            task: Some(task),
            state: Arc::new(Mutex::new(RunnerState::New)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
            done_notify: Arc::new(Notify::new()),
            result: Arc::new(Mutex::new(None)),
        }
    }

    /// Move NEW -> RUNNING and spawn the driver loop. `interval` is the minimum
    /// wall-clock time between the start of one step and the start of the next;
    /// measured from step start, not step end, so a slow step shortens or
    /// eliminates the following sleep.
    pub async fn start(&mut self, interval: Option<Duration>) -> Result<(), RunnerError<T::Error>> {
        {
            let mut state = self.state.lock().await;
            if *state != RunnerState::New {
                return Err(RunnerError::AlreadyRunning);
            }
            *state = RunnerState::Running;
        }
        let task = self
            .task
            .take()
            .expect("state transition from NEW guarantees the task is still present");
        tokio::spawn(drive(
            task,
            interval,
            self.state.clone(),
            self.stop_requested.clone(),
            self.cancel_requested.clone(),
            self.cancel_notify.clone(),
            self.done_notify.clone(),
            self.result.clone(),
        ));
        Ok(())
    }

    /// Request a graceful stop. Takes effect after the current step returns.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Request cancellation. Takes effect at the next suspension point the runner
    /// reaches (the inter-step sleep, if any, is interrupted immediately; an
    /// in-flight step is not preempted and runs to completion).
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    pub async fn state(&self) -> RunnerState {
        *self.state.lock().await
    }

    /// Wait for the runner to reach a terminal state without consuming the result.
    pub async fn wait(&self) {
        loop {
            let notified = self.done_notify.notified();
            tokio::pin!(notified);
            if !matches!(self.state().await, RunnerState::New | RunnerState::Running) {
                return;
            }
            notified.await;
        }
    }

    /// Wait for a terminal state and return the outcome. Can only be read once.
    pub async fn result(&self) -> RunResult<T> {
        loop {
            let notified = self.done_notify.notified();
            tokio::pin!(notified);
            if !matches!(self.state().await, RunnerState::New | RunnerState::Running) {
                let mut guard = self.result.lock().await;
                return guard
                    .take()
                    .expect("terminal state implies a stored result that hasn't been taken yet");
            }
            notified.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive<T: Task>(
    mut task: T,
    interval: Option<Duration>,
    state: Arc<Mutex<RunnerState>>,
    stop_requested: Arc<AtomicBool>,
    cancel_requested: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    done_notify: Arc<Notify>,
    result: Arc<Mutex<Option<RunResult<T>>>>,
) {
    loop {
        if cancel_requested.load(Ordering::SeqCst) {
            task.on_cancelled().await;
            finish(&state, &result, &done_notify, RunnerState::Cancelled, Err(RunnerError::Cancelled)).await;
            return;
        }

        let step_start = Instant::now();
        match task.step().await {
            StepOutcome::Done(value) => {
                finish(&state, &result, &done_notify, RunnerState::Completed, Ok(value)).await;
                return;
            }
            StepOutcome::Raised(err) => {
                if let Err(fatal) = task.handle_exception(err).await {
                    finish(&state, &result, &done_notify, RunnerState::Failed, Err(RunnerError::Failed(fatal))).await;
                    return;
                }
            }
            StepOutcome::Continue => {}
        }

        if stop_requested.load(Ordering::SeqCst) {
            task.on_stopped().await;
            finish(&state, &result, &done_notify, RunnerState::Stopped, Err(RunnerError::Stopped)).await;
            return;
        }
        if cancel_requested.load(Ordering::SeqCst) {
            task.on_cancelled().await;
            finish(&state, &result, &done_notify, RunnerState::Cancelled, Err(RunnerError::Cancelled)).await;
            return;
        }

        if let Some(interval) = interval {
            let elapsed = step_start.elapsed();
            if elapsed < interval {
                let remaining = interval - elapsed;
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = cancel_notify.notified() => {}
                }
            }
        }
    }
}

async fn finish<T: Task>(
    state: &Arc<Mutex<RunnerState>>,
    result: &Arc<Mutex<Option<RunResult<T>>>>,
    done_notify: &Arc<Notify>,
    new_state: RunnerState,
    value: RunResult<T>,
) {
    *state.lock().await = new_state;
    *result.lock().await = Some(value);
    done_notify.notify_waiters();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct TestError;

    struct CountToThree(Arc<AtomicU32>);

    #[async_trait]
    impl Task for CountToThree {
        type Output = u32;
        type Error = TestError;

        async fn step(&mut self) -> StepOutcome<Self::Output, Self::Error> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 3 {
                StepOutcome::Done(n)
            } else {
                StepOutcome::Continue
            }
        }
    }

    #[tokio::test]
    async fn runs_to_completion() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut runner = Runner::new(CountToThree(counter.clone()));
        runner.start(None).await.unwrap();
        let result = runner.result().await.unwrap();
        assert_eq!(result, 3);
        assert_eq!(runner.state().await, RunnerState::Completed);
    }

    struct Forever;

    #[async_trait]
    impl Task for Forever {
        type Output = ();
        type Error = TestError;

        async fn step(&mut self) -> StepOutcome<Self::Output, Self::Error> {
            StepOutcome::Continue
        }
    }

    #[tokio::test]
    async fn stop_takes_effect_after_current_step() {
        let mut runner = Runner::new(Forever);
        runner.start(Some(Duration::from_millis(10))).await.unwrap();
        runner.stop();
        let result = runner.result().await;
        assert!(matches!(result, Err(RunnerError::Stopped)));
    }

    #[tokio::test]
    async fn cancel_during_sleep_is_observed_promptly() {
        let mut runner = Runner::new(Forever);
        runner.start(Some(Duration::from_secs(60))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        runner.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), runner.result()).await;
        assert!(matches!(result, Ok(Err(RunnerError::Cancelled))));
    }

    struct AlwaysFails;

    #[async_trait]
    impl Task for AlwaysFails {
        type Output = ();
        type Error = TestError;

        async fn step(&mut self) -> StepOutcome<Self::Output, Self::Error> {
            StepOutcome::Raised(TestError)
        }
    }

    #[tokio::test]
    async fn unhandled_error_fails_the_runner() {
        let mut runner = Runner::new(AlwaysFails);
        runner.start(None).await.unwrap();
        let result = runner.result().await;
        assert!(matches!(result, Err(RunnerError::Failed(_))));
        assert_eq!(runner.state().await, RunnerState::Failed);
    }
}
