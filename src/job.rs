//! The core job entity and its construction surface.
//!
//! A [`Job`] is a durably recorded unit of work: a command identifier with an
//! ordered argument list, a queue name, a dependency set, and a bounded retry
//! budget. Producers build jobs via [`NewJob`]; the store assigns the identity
//! when the job is first persisted.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The queue jobs are placed on when no queue is named explicitly.
///
/// Unrestricted pending-job searches only consider this queue; jobs on other
/// queues are invisible to them.
pub const DEFAULT_QUEUE: &str = "default";

/// Store-assigned job identity.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct JobId(i64);

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<JobId> for i64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// The lifecycle state of a job.
///
/// A job starts out `Pending`, becomes `Running` when a worker claims it, and
/// ends in exactly one of the terminal states. Terminal states are never left:
/// a failed job is re-attempted by spawning a *new* retry job rather than by
/// reopening the original record.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Freshly constructed, not yet eligible for selection.
    New,
    /// Waiting to be claimed once all dependencies have finished.
    Pending,
    /// Claimed by a worker and currently in flight.
    Running,
    /// Completed successfully. The only state that satisfies dependents.
    Finished,
    /// Reported as failed by a worker. Retry-eligible.
    Failed,
    /// Killed, or failed with the retry budget exhausted.
    Terminated,
    /// The worker stopped before producing a definite outcome.
    Incomplete,
    /// Will never run; also the state cascaded onto dependents of a
    /// non-successful prerequisite.
    Canceled,
}

impl JobState {
    /// Whether this state closes the job for good.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Terminated | Self::Incomplete | Self::Canceled
        )
    }

    /// Whether this state satisfies jobs depending on it.
    pub fn is_success(self) -> bool {
        self == Self::Finished
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::Incomplete => "incomplete",
            Self::Canceled => "canceled",
        };
        write!(f, "{name}")
    }
}

/// A polymorphic reference to an external-domain entity a job is associated
/// with.
///
/// Modeled as a type tag plus an opaque identifier; composite identifiers are
/// allowed, hence the JSON value. The queue never dereferences these, it only
/// matches on them for lookups.
#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub identifier: serde_json::Value,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, identifier: impl Into<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }
}

/// A persisted job record.
///
/// Relationship fields hold ids rather than references: dependency and retry
/// edges live in the store, and materialized `Job` values are plain data that
/// can be cloned, cached, and evicted freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub args: Vec<String>,
    pub state: JobState,
    pub queue: String,
    /// When set, the manager never logs this job's arguments.
    pub confidential: bool,
    /// Bound on automatic retry attempts; zero disables retries.
    pub max_retries: u32,
    /// Jobs that must reach [`JobState::Finished`] before this one may run.
    pub dependencies: Vec<JobId>,
    /// Retry jobs spawned from this job, oldest first. Only ever non-empty on
    /// an original job.
    pub retry_jobs: Vec<JobId>,
    /// Back-reference to the original job if this job is a retry.
    pub original_job: Option<JobId>,
    pub related_entities: Vec<EntityRef>,
    /// Earliest instant the job may be selected; `None` means immediately.
    pub execute_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_retry_job(&self) -> bool {
        self.original_job.is_some()
    }

    /// Whether the job is due for selection at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.execute_after.map_or(true, |after| after <= now)
    }

    /// One-line description safe to log regardless of confidentiality.
    pub fn summary(&self) -> String {
        if self.confidential {
            format!("{} [confidential]", self.command)
        } else {
            format!("{} {:?}", self.command, self.args)
        }
    }
}

/// An unpersisted job as handed to the store.
///
/// This is the construction surface for producers: everything defaults to the
/// common case (`pending`, default queue, no retries, no dependencies) and is
/// adjusted through the consuming `with_*` methods.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub command: String,
    pub args: Vec<String>,
    pub state: JobState,
    pub queue: String,
    pub confidential: bool,
    pub max_retries: u32,
    pub dependencies: Vec<JobId>,
    pub original_job: Option<JobId>,
    pub related_entities: Vec<EntityRef>,
    pub execute_after: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            state: JobState::Pending,
            queue: DEFAULT_QUEUE.to_owned(),
            confidential: false,
            max_retries: 0,
            dependencies: Vec::new(),
            original_job: None,
            related_entities: Vec::new(),
            execute_after: None,
        }
    }

    pub fn with_args(self, args: Vec<impl Into<String>>) -> Self {
        let args = args.into_iter().map(Into::into).collect();
        Self { args, ..self }
    }

    /// Overrides the initial state. Jobs default to [`JobState::Pending`].
    pub fn in_state(self, state: JobState) -> Self {
        Self { state, ..self }
    }

    pub fn on_queue(self, queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..self
        }
    }

    pub fn confidential(self, confidential: bool) -> Self {
        Self {
            confidential,
            ..self
        }
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    pub fn depends_on(self, dependency: JobId) -> Self {
        let mut dependencies = self.dependencies;
        dependencies.push(dependency);
        Self {
            dependencies,
            ..self
        }
    }

    pub fn with_dependencies(self, dependencies: Vec<JobId>) -> Self {
        Self {
            dependencies,
            ..self
        }
    }

    /// Marks this job as a retry attempt of `original`.
    pub fn retry_of(self, original: JobId) -> Self {
        Self {
            original_job: Some(original),
            ..self
        }
    }

    pub fn related_to(self, entity: EntityRef) -> Self {
        let mut related_entities = self.related_entities;
        related_entities.push(entity);
        Self {
            related_entities,
            ..self
        }
    }

    pub fn execute_after(self, after: DateTime<Utc>) -> Self {
        Self {
            execute_after: Some(after),
            ..self
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn terminal_states() {
        for state in [
            JobState::Finished,
            JobState::Failed,
            JobState::Terminated,
            JobState::Incomplete,
            JobState::Canceled,
        ] {
            assert!(state.is_terminal());
        }
        for state in [JobState::New, JobState::Pending, JobState::Running] {
            assert!(!state.is_terminal());
        }
        assert!(JobState::Finished.is_success());
        assert!(!JobState::Terminated.is_success());
    }

    #[test]
    fn new_job_defaults() {
        let job = NewJob::new("a");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.queue, DEFAULT_QUEUE);
        assert!(job.args.is_empty());
        assert!(!job.confidential);
        assert_eq!(job.max_retries, 0);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&JobState::Terminated).unwrap();
        assert_eq!(json, "\"terminated\"");
    }

    #[test]
    fn summary_redacts_confidential_args() {
        use crate::store::memory::test::persisted;

        let job = persisted(1, NewJob::new("send-mail").with_args(vec!["secret"]));
        assert!(job.summary().contains("secret"));

        let job = persisted(
            2,
            NewJob::new("send-mail")
                .with_args(vec!["secret"])
                .confidential(true),
        );
        assert!(!job.summary().contains("secret"));
    }
}
