//! The persistence contract consumed by the job manager.
//!
//! The queue core never talks to a concrete database; it speaks to a
//! [`JobStore`] which hands out transactional scopes. Every manager operation
//! runs inside one [`StoreTransaction`], which is what makes check-then-insert
//! and scan-and-claim sequences safe under concurrent workers: the store's
//! isolation, not in-process locking, is the coordination mechanism.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{EntityRef, Job, JobId, JobState, NewJob};

pub mod memory;
pub(crate) mod queryable;

/// A handle to the durable job store.
///
/// Implementations are cheap to clone; clones refer to the same underlying
/// store.
#[async_trait]
pub trait JobStore: Clone + Send + Sync {
    type Transaction: StoreTransaction;

    /// Opens a transactional scope. All reads and writes performed through the
    /// returned transaction are isolated from concurrent scopes until
    /// [`StoreTransaction::commit`] is called.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

/// A transactional scope over job records.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Returns all jobs matching `query`, in stable creation order.
    async fn query(&mut self, query: Query<'_>) -> Result<Vec<Job>, StoreError>;

    /// Persists a new job, assigning its identity.
    ///
    /// Fails with [`StoreError::JobNotFound`] if a dependency references a job
    /// that does not exist. Because dependencies can only point at
    /// already-persisted jobs, freshly inserted records can never close a
    /// dependency cycle.
    async fn persist(&mut self, job: NewJob) -> Result<Job, StoreError>;

    /// Saves a modified job record.
    ///
    /// Fails with [`StoreError::DependencyCycle`] if an edited dependency set
    /// would make the graph cyclic.
    async fn update(&mut self, job: &Job) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

/// The predicate shapes the manager needs from the store.
///
/// Mirrors what a relational backend would express as a `WHERE` clause;
/// combinators nest arbitrarily.
#[derive(Debug, PartialEq, Clone)]
pub enum Query<'a> {
    And(Vec<Query<'a>>),
    Or(Vec<Query<'a>>),
    Not(Box<Query<'a>>),
    IdEquals(JobId),
    IdIn(&'a [JobId]),
    CommandEquals(&'a str),
    CommandIn(&'a [&'a str]),
    ArgsEqual(&'a [String]),
    StateEquals(JobState),
    QueueIn(&'a [&'a str]),
    /// Set equality on the dependency edge set, order-insensitive.
    DependenciesEqual(&'a [JobId]),
    /// Jobs holding a dependency edge onto the given job.
    DependsOn(JobId),
    RelatedTo(&'a EntityRef),
    /// Jobs whose `execute_after` has passed (or is unset) at the given
    /// instant.
    DueBy(DateTime<Utc>),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no job with id {0}")]
    JobNotFound(JobId),
    #[error("dependency cycle detected involving {0}")]
    DependencyCycle(JobId),
    #[error("store in bad state")]
    BadState,
}
