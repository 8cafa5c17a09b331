//! A persistent, dependency-aware job queue.
//!
//! Jobs are durably recorded with a command identifier, arguments, a queue
//! name, and dependencies on other jobs. Independent worker processes ask the
//! [`manager::JobManager`] for a startable job, execute its command, and
//! report a terminal outcome back via [`manager::JobManager::close_job`]. The
//! manager propagates non-successful outcomes through dependents (cascading
//! cancellation) and re-attempts failed jobs with bounded, backoff-scheduled
//! retry jobs.
//!
//! Persistence is behind the [`store::JobStore`] trait; workers coordinate
//! purely through the store's transactional isolation, so any transactional
//! relational backend can be plugged in. [`store::memory::InMemoryStore`] is
//! a correct reference implementation.
//!
//! # Example
//!
//! ```
//! use jobgraph::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), JobQueueError> {
//! let manager = JobManager::new(
//!     InMemoryStore::new(),
//!     NullNotifier,
//!     ExponentialRetryScheduler::default(),
//! );
//!
//! let job = manager.get_or_create_if_not_exists("app:send-newsletter", &[]).await?;
//!
//! // The worker loop: claim, execute, report.
//! let mut excluded = Vec::new();
//! let claimed = manager.find_startable_job(DEFAULT_QUEUE, &mut excluded).await?;
//! assert_eq!(claimed.map(|job| job.id), Some(job.id));
//!
//! let running = manager.get_job("app:send-newsletter", &[]).await?;
//! manager.close_job(&running, JobState::Finished).await?;
//! # Ok(())
//! # }
//! ```

pub mod job;
pub mod manager;
pub mod notifier;
pub mod prelude;
pub mod retry;
pub mod store;

use thiserror::Error;

use job::JobState;
use store::StoreError;

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("found no job for command `{command}` with args {args:?}")]
    NotFound { command: String, args: Vec<String> },
    #[error("`{0}` is not a terminal state")]
    NotTerminal(JobState),
    #[error("error communicating with the job store")]
    Store(#[from] StoreError),
}
