//! Orchestration of job lookup, startable-job selection, and cascading close.
//!
//! [`JobManager`] is the scheduling and lifecycle core of the queue. It owns
//! no jobs itself; every operation opens one transactional scope on the
//! [`JobStore`], so concurrent worker processes coordinate purely through the
//! store's isolation. State transitions are announced through the
//! [`EventNotifier`] handed in at construction, in dependency order.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fxhash::{FxHashMap, FxHashSet};

use crate::{
    job::{EntityRef, Job, JobId, JobState, NewJob, DEFAULT_QUEUE},
    notifier::EventNotifier,
    retry::RetryScheduler,
    store::{JobStore, Query, StoreError, StoreTransaction},
    JobQueueError,
};

/// The scheduling and lifecycle core of the job queue.
pub struct JobManager<S, N, R> {
    store: S,
    notifier: N,
    retry_scheduler: R,
    /// Materialized jobs by id. A plain cache: entries are refreshed on every
    /// load and explicitly evicted when the startable scan rules a job out,
    /// so a long graph walk does not accumulate stale instances.
    identity_map: Mutex<FxHashMap<JobId, Job>>,
}

impl<S, N, R> JobManager<S, N, R>
where
    S: JobStore,
    N: EventNotifier,
    R: RetryScheduler,
{
    pub fn new(store: S, notifier: N, retry_scheduler: R) -> Self {
        Self {
            store,
            notifier,
            retry_scheduler,
            identity_map: Mutex::new(FxHashMap::default()),
        }
    }

    /// Exact-match lookup on `(command, args)`. Argument order matters.
    ///
    /// Fails with [`JobQueueError::NotFound`] when no job matches both
    /// fields; a job with the same command but different args is never
    /// returned.
    pub async fn get_job(&self, command: &str, args: &[String]) -> Result<Job, JobQueueError> {
        let mut tx = self.store.begin().await?;
        let job = tx
            .query(Query::And(vec![
                Query::CommandEquals(command),
                Query::ArgsEqual(args),
            ]))
            .await?
            .into_iter()
            .next();
        tx.commit().await?;

        match job {
            Some(job) => {
                self.cache(&job);
                Ok(job)
            }
            None => Err(JobQueueError::NotFound {
                command: command.to_owned(),
                args: args.to_vec(),
            }),
        }
    }

    /// Like [`Self::get_job`], but persists a new pending job when no match
    /// exists.
    ///
    /// The check-then-insert runs inside a single store transaction, so
    /// concurrent callers requesting the identical `(command, args)` pair
    /// create at most one job between them.
    pub async fn get_or_create_if_not_exists(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<Job, JobQueueError> {
        let mut tx = self.store.begin().await?;
        let existing = tx
            .query(Query::And(vec![
                Query::CommandEquals(command),
                Query::ArgsEqual(args),
            ]))
            .await?
            .into_iter()
            .next();
        let job = match existing {
            Some(job) => job,
            None => {
                tx.persist(NewJob::new(command).with_args(args.to_vec()))
                    .await?
            }
        };
        tx.commit().await?;
        self.cache(&job);
        Ok(job)
    }

    /// Returns an arbitrary due pending job, ignoring dependencies.
    ///
    /// With `restricted_queues` empty only the default queue is searched;
    /// jobs on other queues are invisible to an unrestricted search.
    pub async fn find_pending_job(
        &self,
        excluded_ids: &[JobId],
        excluded_commands: &[&str],
        restricted_queues: &[&str],
    ) -> Result<Option<Job>, JobQueueError> {
        let mut tx = self.store.begin().await?;
        let job = Self::next_pending(&mut tx, excluded_ids, excluded_commands, restricted_queues)
            .await?;
        tx.commit().await?;
        if let Some(ref job) = job {
            self.cache(job);
        }
        Ok(job)
    }

    /// Re-locates a pending job from its dependency fingerprint: the job
    /// whose dependency set equals exactly the given ids.
    pub async fn find_pending_job_with_dependencies(
        &self,
        dependency_ids: &[JobId],
    ) -> Result<Option<Job>, JobQueueError> {
        let mut tx = self.store.begin().await?;
        let job = tx
            .query(Query::And(vec![
                Query::StateEquals(JobState::Pending),
                Query::DependenciesEqual(dependency_ids),
            ]))
            .await?
            .into_iter()
            .next();
        tx.commit().await?;
        if let Some(ref job) = job {
            self.cache(job);
        }
        Ok(job)
    }

    /// Selects and atomically claims a startable job on `queue`.
    ///
    /// Walks pending candidates depth-first: a candidate whose dependencies
    /// have all finished is transitioned to `running` and returned; a
    /// candidate blocked on a pending dependency yields to that dependency
    /// first. Every non-startable candidate encountered is appended to
    /// `excluded_ids` — so later scans skip it without re-querying — and
    /// evicted from the identity map. The accumulator is mutated even when
    /// `None` is returned.
    ///
    /// The whole scan plus the claiming transition runs in one store
    /// transaction; a concurrent worker observes the claimed job as no longer
    /// startable.
    pub async fn find_startable_job(
        &self,
        queue: &str,
        excluded_ids: &mut Vec<JobId>,
    ) -> Result<Option<Job>, JobQueueError> {
        let mut tx = self.store.begin().await?;
        let queues = [queue];
        let mut work_list: Vec<JobId> = Vec::new();
        let mut visited: FxHashSet<JobId> = FxHashSet::default();

        loop {
            let candidate = match work_list.pop() {
                Some(id) => {
                    if visited.contains(&id) || excluded_ids.contains(&id) {
                        continue;
                    }
                    match Self::load(&mut tx, id).await? {
                        Some(job)
                            if job.state == JobState::Pending
                                && job.queue == queue
                                && job.is_due(Utc::now()) =>
                        {
                            job
                        }
                        _ => continue,
                    }
                }
                None => {
                    let skipped: Vec<JobId> = excluded_ids
                        .iter()
                        .chain(visited.iter())
                        .copied()
                        .collect();
                    match Self::next_pending(&mut tx, &skipped, &[], &queues).await? {
                        Some(job) => job,
                        None => break,
                    }
                }
            };
            visited.insert(candidate.id);
            self.cache(&candidate);

            let dependencies = if candidate.dependencies.is_empty() {
                Vec::new()
            } else {
                tx.query(Query::IdIn(&candidate.dependencies)).await?
            };

            if dependencies.iter().all(|dep| dep.state.is_success()) {
                let mut job = candidate;
                job.state = JobState::Running;
                job.started_at = Some(Utc::now());
                tx.update(&job).await?;
                tx.commit().await?;
                self.cache(&job);
                tracing::debug!(job_id = %job.id, job = %job.summary(), "claimed startable job");
                return Ok(Some(job));
            }

            // Not startable. Exclude it so this scan and later ones skip it,
            // and drop the stale instance from the identity map.
            excluded_ids.push(candidate.id);
            self.evict(candidate.id);
            tracing::debug!(job_id = %candidate.id, "excluded non-startable job");

            for dependency in &dependencies {
                if dependency.state == JobState::Pending && !visited.contains(&dependency.id) {
                    work_list.push(dependency.id);
                }
            }
        }

        tx.commit().await?;
        Ok(None)
    }

    /// Closes `job` with a terminal state, cascading through the dependency
    /// graph.
    ///
    /// Closing an already-terminal job is a no-op. A `failed` outcome with
    /// retry budget left spawns a retry job instead of closing the original;
    /// an exhausted budget finalizes the original as `terminated`. All
    /// non-successful closures cancel direct and transitive dependents, each
    /// transition emitting its own notification with the prerequisite's
    /// preceding its dependents'.
    pub async fn close_job(&self, job: &Job, final_state: JobState) -> Result<(), JobQueueError> {
        if !final_state.is_terminal() {
            return Err(JobQueueError::NotTerminal(final_state));
        }

        let mut tx = self.store.begin().await?;
        let mut pending_closures: VecDeque<(JobId, JobState)> = VecDeque::new();
        let mut visited: FxHashSet<JobId> = FxHashSet::default();
        pending_closures.push_back((job.id, final_state));

        while let Some((id, state)) = pending_closures.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let job = Self::load(&mut tx, id)
                .await?
                .ok_or(StoreError::JobNotFound(id))?;
            if job.state.is_terminal() {
                continue;
            }
            self.close_one(&mut tx, job, state, &mut pending_closures)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Looks up a job with the given command associated with the given
    /// external entity.
    pub async fn find_job_for_related_entity(
        &self,
        command: &str,
        entity: &EntityRef,
    ) -> Result<Option<Job>, JobQueueError> {
        let mut tx = self.store.begin().await?;
        let job = tx
            .query(Query::And(vec![
                Query::CommandEquals(command),
                Query::RelatedTo(entity),
            ]))
            .await?
            .into_iter()
            .next();
        tx.commit().await?;
        if let Some(ref job) = job {
            self.cache(job);
        }
        Ok(job)
    }

    /// Whether a materialized instance of the job is currently held in the
    /// identity map.
    pub fn contains(&self, id: JobId) -> bool {
        self.identity_map().contains_key(&id)
    }

    async fn close_one<T: StoreTransaction>(
        &self,
        tx: &mut T,
        mut job: Job,
        final_state: JobState,
        pending_closures: &mut VecDeque<(JobId, JobState)>,
    ) -> Result<(), JobQueueError> {
        match final_state {
            JobState::Canceled => {
                self.set_closed(tx, &mut job, JobState::Canceled).await?;
                match job.original_job {
                    // Canceling a retry cancels the chain's original as well.
                    Some(original) => pending_closures.push_back((original, JobState::Canceled)),
                    None => self.cancel_dependents(tx, &job, pending_closures).await?,
                }
            }
            JobState::Failed => match job.original_job {
                Some(original) => {
                    self.set_closed(tx, &mut job, JobState::Failed).await?;
                    // The original decides between another retry and
                    // termination.
                    pending_closures.push_back((original, JobState::Failed));
                }
                None if (job.retry_jobs.len() as u32) < job.max_retries => {
                    if job.retry_jobs.is_empty() {
                        // First failure is announced on the original; later
                        // attempts surface through their retry jobs.
                        self.notifier.notify(&job, JobState::Failed);
                    }
                    self.spawn_retry(tx, &mut job).await?;
                }
                None => {
                    // Retry budget exhausted: the original closes for good.
                    self.set_closed(tx, &mut job, JobState::Terminated).await?;
                    self.cancel_dependents(tx, &job, pending_closures).await?;
                }
            },
            JobState::Finished => {
                self.set_closed(tx, &mut job, JobState::Finished).await?;
                // A successful retry completes the original. Success never
                // cascades onto dependents; they simply become startable.
                if let Some(original) = job.original_job {
                    pending_closures.push_back((original, JobState::Finished));
                }
            }
            JobState::Terminated | JobState::Incomplete => {
                self.set_closed(tx, &mut job, final_state).await?;
                match job.original_job {
                    Some(original) => pending_closures.push_back((original, final_state)),
                    None => self.cancel_dependents(tx, &job, pending_closures).await?,
                }
            }
            JobState::New | JobState::Pending | JobState::Running => {
                unreachable!("close_job rejects non-terminal states")
            }
        }
        Ok(())
    }

    /// Finalizes one job's state, persists it, and announces the transition.
    async fn set_closed<T: StoreTransaction>(
        &self,
        tx: &mut T,
        job: &mut Job,
        state: JobState,
    ) -> Result<(), JobQueueError> {
        job.state = state;
        job.closed_at = Some(Utc::now());
        tx.update(job).await?;
        self.cache(job);
        self.notifier.notify(job, state);
        tracing::info!(job_id = %job.id, state = %state, "job closed");
        Ok(())
    }

    /// Spawns the next retry attempt for `original` and keeps the original
    /// displayed as in flight.
    async fn spawn_retry<T: StoreTransaction>(
        &self,
        tx: &mut T,
        original: &mut Job,
    ) -> Result<(), JobQueueError> {
        let attempt = original.retry_jobs.len() as u32;
        let delay = self.retry_scheduler.schedule_next_retry(attempt);
        let retry = tx
            .persist(
                NewJob::new(original.command.clone())
                    .with_args(original.args.clone())
                    .on_queue(original.queue.clone())
                    .confidential(original.confidential)
                    .with_dependencies(original.dependencies.clone())
                    .retry_of(original.id)
                    .execute_after(Utc::now() + delay),
            )
            .await?;
        original.retry_jobs.push(retry.id);
        original.state = JobState::Running;
        tx.update(original).await?;
        self.cache(original);
        self.cache(&retry);
        tracing::info!(
            job_id = %original.id,
            retry_id = %retry.id,
            attempt = attempt + 1,
            "spawned retry job"
        );
        Ok(())
    }

    async fn cancel_dependents<T: StoreTransaction>(
        &self,
        tx: &mut T,
        job: &Job,
        pending_closures: &mut VecDeque<(JobId, JobState)>,
    ) -> Result<(), StoreError> {
        for dependent in tx.query(Query::DependsOn(job.id)).await? {
            pending_closures.push_back((dependent.id, JobState::Canceled));
        }
        Ok(())
    }

    async fn next_pending<T: StoreTransaction>(
        tx: &mut T,
        excluded_ids: &[JobId],
        excluded_commands: &[&str],
        restricted_queues: &[&str],
    ) -> Result<Option<Job>, StoreError> {
        let queues: &[&str] = if restricted_queues.is_empty() {
            &[DEFAULT_QUEUE]
        } else {
            restricted_queues
        };
        let mut clauses = vec![
            Query::StateEquals(JobState::Pending),
            Query::DueBy(Utc::now()),
            Query::QueueIn(queues),
        ];
        if !excluded_ids.is_empty() {
            clauses.push(Query::Not(Box::new(Query::IdIn(excluded_ids))));
        }
        if !excluded_commands.is_empty() {
            clauses.push(Query::Not(Box::new(Query::CommandIn(excluded_commands))));
        }
        Ok(tx.query(Query::And(clauses)).await?.into_iter().next())
    }

    async fn load<T: StoreTransaction>(tx: &mut T, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(tx.query(Query::IdEquals(id)).await?.into_iter().next())
    }

    fn cache(&self, job: &Job) {
        self.identity_map().insert(job.id, job.clone());
    }

    fn evict(&self, id: JobId) {
        self.identity_map().remove(&id);
    }

    fn identity_map(&self) -> MutexGuard<'_, FxHashMap<JobId, Job>> {
        self.identity_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
