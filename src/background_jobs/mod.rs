//! Background job scheduling and execution.
//!
//! Jobs are registered with a [`JobScheduler`] which runs them on their
//! interval, on demand through a [`SchedulerHandle`], and records every
//! execution in the server store.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
