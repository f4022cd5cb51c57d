//! Two small concurrency building blocks: a bounded pool of reusable closable
//! resources, and a sequential task runner bound by a deadline with
//! cooperative interruption between tasks.

mod error;
mod idle;
mod interrupt;
mod pool;
mod resource;
mod runner;
mod task;

pub use error::{PoolError, RunnerError};
pub use interrupt::{CtrlCInterrupt, InterruptRegistration, InterruptSource, InterruptTrigger, ManualInterrupt, NoInterrupt};
pub use pool::{ResourceFactory, ResourcePool};
pub use resource::Closer;
pub use runner::{RunState, TaskRunner};
pub use task::{task, RunnerTask, TaskFuture};
