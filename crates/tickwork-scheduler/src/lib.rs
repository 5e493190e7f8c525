//! `tickwork-scheduler` — multi-tenant cron scheduling and queue processing.
//!
//! # Overview
//!
//! Job definitions live in the store under `tenants/{tenant}/jobs`. The
//! [`watcher::ReconciliationWatcher`] subscribes to that collection for each
//! tenant and keeps the [`registry::JobRegistry`] in step with it: enabled
//! jobs get a live cron trigger, disabled or deleted ones lose theirs.
//! Triggers hand firings to the [`executor::TaskExecutor`], which reloads
//! the definition, bills it, runs it and records the outcome.
//!
//! Cipher requests go through [`queue::QueueProcessor`]: a shared
//! per-tenant queue whose items are claimed with a single store
//! transaction, so any number of workers can drain it at once.
//!
//! [`service::SchedulerService`] owns all of the above.
//!
//! # Job kinds
//!
//! | Kind           | Runs                                              |
//! |----------------|---------------------------------------------------|
//! | `ping`         | HTTP GET under a hard timeout (at most 30 s)      |
//! | `admin_op`     | Maintenance operation on a tenant data collection |
//! | `queue_worker` | One drain pass over the tenant's cipher queue     |

pub mod cipher;
pub mod error;
pub mod executor;
pub mod history;
pub mod ledger;
pub mod paths;
pub mod queue;
pub mod rate;
pub mod registry;
pub mod runners;
pub mod schedule;
pub mod service;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use error::{Result, SchedulerError};
pub use registry::{JobKey, JobRegistry};
pub use schedule::{Clock, CronSchedule, SystemClock};
pub use service::{SchedulerService, SchedulerServiceBuilder};
pub use types::{
    AdminOperation, CipherAction, Job, JobDraft, JobKind, JobTask, LogEntry, Outcome, QueueItem,
    QueueStatus, RunStatus, Submission, Usage,
};
