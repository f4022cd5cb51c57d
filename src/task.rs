use std::future::Future;
use std::pin::Pin;

/// The future a runner task produces for one execution.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A unit of work registered with a [`TaskRunner`](crate::TaskRunner).
///
/// It receives its position in the task list. Tasks report nothing back;
/// failure handling belongs inside the task.
pub type RunnerTask = Box<dyn FnOnce(usize) -> TaskFuture + Send + 'static>;

/// Boxes an async closure into a [`RunnerTask`].
pub fn task<F, Fut>(f: F) -> RunnerTask
where
  F: FnOnce(usize) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Box::new(move |index| Box::pin(f(index)) as TaskFuture)
}
