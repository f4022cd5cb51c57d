use thiserror::Error;

/// Errors returned by a [`ResourcePool`](crate::ResourcePool).
///
/// `E` is the error type reported by the pool's resource factory.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError<E> {
  #[error("Pool capacity must be a positive integer, got {0}")]
  InvalidCapacity(usize),

  #[error("Pool has been closed")]
  PoolClosed,

  #[error("Resource factory failed: {0}")]
  Creation(E),
}

/// Terminal errors of a [`TaskRunner`](crate::TaskRunner) run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
  #[error("received timeout")]
  Timeout,

  #[error("received interrupt")]
  Interrupt,

  #[error("Runner has already been started")]
  AlreadyStarted,

  #[error("Task {index} panicked during execution")]
  TaskPanicked { index: usize },

  #[error("Failed to register the interrupt source: {0}")]
  InterruptRegistration(String),

  #[error("Runner worker exited without reporting an outcome")]
  WorkerLost,
}
