//! Convenience re-exports of the types needed to run the queue.

pub use crate::job::{EntityRef, Job, JobId, JobState, NewJob, DEFAULT_QUEUE};
pub use crate::manager::JobManager;
pub use crate::notifier::{EventNotifier, NullNotifier};
pub use crate::retry::{
    ConstantRetryScheduler, ExponentialRetryScheduler, Jitter, RetryScheduler,
};
pub use crate::store::memory::InMemoryStore;
pub use crate::store::{JobStore, Query, StoreError, StoreTransaction};
pub use crate::JobQueueError;
