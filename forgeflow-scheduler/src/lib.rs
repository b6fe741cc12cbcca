//! C10 Task Scheduler: multi-level priority queues, a bounded
//! cooperative worker pool, workflow-aware throttling of background work,
//! and cron-scheduled tasks mirrored into Artifact Memory.

pub mod cron_task;
pub mod error;
pub mod scheduler;
pub mod task;

pub use cron_task::{derive_cron_expression, run_monitor, run_outcome_listener, CronStore, CronTask, Schedule};
pub use error::SchedulerError;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::{CallableRegistry, Priority, ScheduledCallable, Task, TaskOutcome};
