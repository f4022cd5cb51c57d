use closer_pool::{CtrlCInterrupt, RunnerError, TaskRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TIMEOUT: Duration = Duration::from_secs(4);

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Deadline Runner Example (press Ctrl-C to interrupt between tasks) ---");

  let mut runner = TaskRunner::with_interrupt(TIMEOUT, Arc::new(CtrlCInterrupt::new()));
  for _ in 0..3 {
    // Task `i` sleeps for `i` seconds.
    runner.add_task(|index| async move {
      info!("Processor - Task #{}.", index);
      tokio::time::sleep(Duration::from_secs(index as u64)).await;
    });
  }

  match runner.start().await {
    Ok(()) => info!("Process ended."),
    Err(RunnerError::Timeout) => info!("Terminating due to timeout."),
    Err(RunnerError::Interrupt) => info!("Terminating due to interrupt."),
    Err(e) => tracing::error!("Runner failed: {}", e),
  }
}
