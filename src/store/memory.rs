//! An in-memory implementation of [`JobStore`].
//!
//! Provided as a correct reference implementation for tests and single-process
//! setups; it is not optimized. Transactions take an exclusive lock on the
//! whole store for their scope, which trivially gives the serializable
//! isolation the manager's scan-and-claim and check-then-insert sequences
//! rely on. Writes apply in place; `commit` releases the lock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fxhash::FxHashSet;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::job::{Job, JobId, NewJob};

use super::{queryable::Queryable, JobStore, Query, StoreError, StoreTransaction};

/// An in-memory [`JobStore`]. Clones share the same underlying records.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    jobs: Vec<Job>,
    id_counter: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        Ok(InMemoryTransaction {
            guard: self.inner.clone().lock_owned().await,
        })
    }
}

/// A transaction holding the store's lock until committed or dropped.
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreInner>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn query(&mut self, query: Query<'_>) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .guard
            .jobs
            .iter()
            .filter(|job| query.matches(job))
            .cloned()
            .collect())
    }

    async fn persist(&mut self, job: NewJob) -> Result<Job, StoreError> {
        for dependency in &job.dependencies {
            if !self.guard.jobs.iter().any(|j| j.id == *dependency) {
                return Err(StoreError::JobNotFound(*dependency));
            }
        }

        self.guard.id_counter += 1;
        let job = Job {
            id: self.guard.id_counter.into(),
            command: job.command,
            args: job.args,
            state: job.state,
            queue: job.queue,
            confidential: job.confidential,
            max_retries: job.max_retries,
            dependencies: job.dependencies,
            retry_jobs: Vec::new(),
            original_job: job.original_job,
            related_entities: job.related_entities,
            execute_after: job.execute_after,
            created_at: Utc::now(),
            started_at: None,
            closed_at: None,
        };
        self.guard.jobs.push(job.clone());
        Ok(job)
    }

    async fn update(&mut self, job: &Job) -> Result<(), StoreError> {
        self.reject_cycles(job)?;
        match self.guard.jobs.iter_mut().find(|j| j.id == job.id) {
            None => Err(StoreError::JobNotFound(job.id)),
            Some(record) => {
                *record = job.clone();
                Ok(())
            }
        }
    }

    async fn commit(self) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}

impl InMemoryTransaction {
    /// Walks the dependency graph from `job`'s (possibly edited) edge set and
    /// fails if it can reach `job` again.
    fn reject_cycles(&self, job: &Job) -> Result<(), StoreError> {
        let mut work_list: Vec<JobId> = job.dependencies.clone();
        let mut visited = FxHashSet::default();
        while let Some(id) = work_list.pop() {
            if id == job.id {
                return Err(StoreError::DependencyCycle(job.id));
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(dependency) = self.guard.jobs.iter().find(|j| j.id == id) {
                work_list.extend_from_slice(&dependency.dependencies);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use assert_matches::assert_matches;
    use chrono::{DateTime, Utc};

    use crate::job::JobState;

    use super::*;

    /// Materializes a job record without a store, for predicate tests.
    pub(crate) fn persisted(id: i64, new: NewJob) -> Job {
        Job {
            id: id.into(),
            command: new.command,
            args: new.args,
            state: new.state,
            queue: new.queue,
            confidential: new.confidential,
            max_retries: new.max_retries,
            dependencies: new.dependencies,
            retry_jobs: Vec::new(),
            original_job: new.original_job,
            related_entities: new.related_entities,
            execute_after: new.execute_after,
            created_at: DateTime::<Utc>::MIN_UTC,
            started_at: None,
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn persist_assigns_increasing_ids() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let a = tx.persist(NewJob::new("a")).await.unwrap();
        let b = tx.persist(NewJob::new("b")).await.unwrap();
        tx.commit().await.unwrap();

        assert!(i64::from(a.id) < i64::from(b.id));
    }

    #[tokio::test]
    async fn persist_rejects_unknown_dependency() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let result = tx.persist(NewJob::new("a").depends_on(99.into())).await;

        assert_matches!(result, Err(StoreError::JobNotFound(id)) if id == 99.into());
    }

    #[tokio::test]
    async fn update_rejects_unknown_job() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let result = tx.update(&persisted(7, NewJob::new("a"))).await;

        assert_matches!(result, Err(StoreError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn update_rejects_dependency_cycles() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let a = tx.persist(NewJob::new("a")).await.unwrap();
        let b = tx.persist(NewJob::new("b").depends_on(a.id)).await.unwrap();
        let c = tx.persist(NewJob::new("c").depends_on(b.id)).await.unwrap();

        let mut edited = a.clone();
        edited.dependencies.push(c.id);
        assert_matches!(
            tx.update(&edited).await,
            Err(StoreError::DependencyCycle(id)) if id == a.id
        );

        // A diamond is fine: shared dependencies are not cycles.
        let mut edited = c.clone();
        edited.dependencies.push(a.id);
        assert_matches!(tx.update(&edited).await, Ok(()));
    }

    #[tokio::test]
    async fn updates_are_visible_to_later_transactions() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut job = tx.persist(NewJob::new("a")).await.unwrap();
        job.state = JobState::Running;
        tx.update(&job).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let jobs = tx.query(Query::IdEquals(job.id)).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state, JobState::Running);
    }

    #[tokio::test]
    async fn transactions_are_serialized() {
        let store = InMemoryStore::new();
        let tx = store.begin().await.unwrap();

        let handle = tokio::spawn({
            let store = store.clone();
            async move {
                let mut tx = store.begin().await.unwrap();
                tx.persist(NewJob::new("late")).await.unwrap();
                tx.commit().await.unwrap();
            }
        });

        // The spawned transaction cannot begin while ours holds the store.
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        tx.commit().await.unwrap();
        handle.await.unwrap();
    }
}
