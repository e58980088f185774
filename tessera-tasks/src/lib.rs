//! Cancellable off-thread work: the background task contract, the scheduler running it, and the
//! concrete expression, raster and selection tasks.

pub mod cancel_iter;
pub mod context;
pub mod error;
pub mod raster;
pub mod scheduler;
pub mod stats;
pub mod task;
pub mod tasks;

pub use context::TaskContext;
pub use error::TaskError;
pub use scheduler::{FinishedTask, TaskCallbacks, TaskHandle, TaskOutcome, TaskScheduler};
pub use task::{BackgroundTask, TaskId, TaskKind, TaskState};
