use crate::error::RunnerError;
use crate::interrupt::{InterruptRegistration, InterruptSource, NoInterrupt};
use crate::task::{self, RunnerTask};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

// Used when `now + timeout` overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle of a [`TaskRunner`]. A run leaves `Running` for exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
  Idle,
  Running,
  /// Every task ran to completion before the deadline.
  Completed,
  /// The deadline elapsed first.
  TimedOut,
  /// An interrupt was observed at a task boundary.
  Interrupted,
  /// A task panicked, or the run could not be set up.
  Failed,
}

impl RunState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, RunState::Idle | RunState::Running)
  }
}

/// Runs an ordered list of tasks, one at a time, under a fixed deadline.
///
/// The tasks run on a spawned Tokio task while [`TaskRunner::start`] races that
/// worker's outcome against the deadline. Cancellation is cooperative: the
/// interrupt source and the deadline are only acted on between tasks. A task
/// that is already running is never aborted; on timeout the worker is abandoned
/// and stops at its next task boundary.
///
/// Tasks share the runtime's worker threads, so a task that blocks the thread
/// (rather than awaiting) also delays the deadline timer on a current-thread runtime.
pub struct TaskRunner {
  run_id: u64,
  deadline: Instant,
  tasks: Vec<RunnerTask>,
  interrupt: Arc<dyn InterruptSource>,
  state: RunState,
}

impl fmt::Debug for TaskRunner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskRunner")
      .field("run_id", &self.run_id)
      .field("deadline", &self.deadline)
      .field("task_count", &self.tasks.len())
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}

impl TaskRunner {
  /// Creates a runner whose deadline is `timeout` from now and which is never interrupted.
  pub fn new(timeout: Duration) -> Self {
    Self::with_interrupt(timeout, Arc::new(NoInterrupt))
  }

  /// Creates a runner whose deadline is `timeout` from now, sampling `interrupt`
  /// before each task. Runners may share a source; each run registers on its own.
  pub fn with_interrupt(timeout: Duration, interrupt: Arc<dyn InterruptSource>) -> Self {
    let now = Instant::now();
    let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);

    Self {
      run_id: NEXT_RUN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      deadline,
      tasks: Vec::new(),
      interrupt,
      state: RunState::Idle,
    }
  }

  pub fn id(&self) -> u64 {
    self.run_id
  }

  pub fn state(&self) -> RunState {
    self.state
  }

  pub fn task_count(&self) -> usize {
    self.tasks.len()
  }

  pub fn deadline(&self) -> Instant {
    self.deadline
  }

  /// Time left until the deadline, zero once it has passed.
  pub fn remaining(&self) -> Duration {
    self.deadline.saturating_duration_since(Instant::now())
  }

  /// Appends tasks in order. Must be called before [`TaskRunner::start`];
  /// tasks added afterwards are never run.
  pub fn add<I>(&mut self, tasks: I)
  where
    I: IntoIterator<Item = RunnerTask>,
  {
    if self.state != RunState::Idle {
      warn!(run_id = self.run_id, state = ?self.state, "Tasks added after the runner started will not run.");
    }
    self.tasks.extend(tasks);
  }

  /// Appends a single async closure as a task.
  pub fn add_task<F, Fut>(&mut self, f: F)
  where
    F: FnOnce(usize) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.add([task::task(f)]);
  }

  /// Runs every registered task in order until they finish, the deadline
  /// passes, or an interrupt is seen between tasks.
  ///
  /// Must be awaited inside a Tokio runtime.
  ///
  /// # Errors
  /// - `RunnerError::Timeout` if the deadline elapsed first.
  /// - `RunnerError::Interrupt` if the interrupt source fired before the last task started.
  /// - `RunnerError::TaskPanicked` if a task panicked.
  /// - `RunnerError::AlreadyStarted` if this runner was started before.
  /// - `RunnerError::InterruptRegistration` if the interrupt source could not be registered.
  pub async fn start(&mut self) -> Result<(), RunnerError> {
    let run_id = self.run_id;
    if self.state != RunState::Idle {
      warn!(run_id, state = ?self.state, "Start: runner already started.");
      return Err(RunnerError::AlreadyStarted);
    }
    self.state = RunState::Running;

    let registration = match self.interrupt.register() {
      Ok(registration) => Arc::new(registration),
      Err(e) => {
        error!(run_id, "Start: failed to register interrupt source: {}", e);
        self.state = RunState::Failed;
        return Err(RunnerError::InterruptRegistration(e.to_string()));
      }
    };

    let tasks = std::mem::take(&mut self.tasks);
    info!(run_id, task_count = tasks.len(), remaining = ?self.remaining(), "Runner started.");

    let (outcome_tx, outcome_rx) = oneshot::channel::<Result<(), RunnerError>>();
    let abandon_token = CancellationToken::new();
    let worker_interrupt = registration.clone();
    let worker_abandon_token = abandon_token.clone();

    // Detached: dropping the JoinHandle does not cancel the worker.
    tokio::spawn(
      async move {
        let outcome = Self::run_tasks(run_id, tasks, worker_interrupt, worker_abandon_token).await;
        if outcome_tx.send(outcome).is_err() {
          trace!(run_id, "Outcome receiver dropped; worker result discarded.");
        }
      }
      .instrument(info_span!("task_runner_worker", run_id)),
    );

    let outcome = tokio::select! {
      biased;

      received = outcome_rx => match received {
        Ok(outcome) => outcome,
        Err(_) => {
          error!(run_id, "Worker dropped its outcome channel without reporting.");
          Err(RunnerError::WorkerLost)
        }
      },

      _ = time::sleep_until(self.deadline) => {
        warn!(run_id, "Deadline elapsed before the tasks finished. Abandoning worker.");
        abandon_token.cancel();
        Err(RunnerError::Timeout)
      }
    };

    registration.deregister();
    self.state = match &outcome {
      Ok(()) => RunState::Completed,
      Err(RunnerError::Timeout) => RunState::TimedOut,
      Err(RunnerError::Interrupt) => RunState::Interrupted,
      Err(_) => RunState::Failed,
    };
    info!(run_id, state = ?self.state, "Runner finished.");

    outcome
  }

  async fn run_tasks(
    run_id: u64,
    tasks: Vec<RunnerTask>,
    interrupt: Arc<InterruptRegistration>,
    abandon_token: CancellationToken,
  ) -> Result<(), RunnerError> {
    for (index, task) in tasks.into_iter().enumerate() {
      if abandon_token.is_cancelled() {
        debug!(run_id, task_index = index, "Run abandoned after deadline. Skipping remaining tasks.");
        return Err(RunnerError::Timeout);
      }

      if interrupt.try_consume() {
        interrupt.deregister();
        info!(run_id, task_index = index, "Interrupt received. Stopping before task.");
        return Err(RunnerError::Interrupt);
      }

      trace!(run_id, task_index = index, "Executing task.");
      let task_result = AssertUnwindSafe(async move { task(index).await })
        .catch_unwind()
        .await;
      if task_result.is_err() {
        error!(run_id, task_index = index, "Task panicked during execution.");
        return Err(RunnerError::TaskPanicked { index });
      }
    }

    trace!(run_id, "All tasks executed.");
    Ok(())
  }
}
