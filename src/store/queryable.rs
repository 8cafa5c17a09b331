use crate::job::Job;

use super::Query;

/// In-process evaluation of [`Query`] predicates against materialized jobs.
pub(crate) trait Queryable {
    fn matches(&self, job: &Job) -> bool;
}

impl Queryable for Query<'_> {
    fn matches(&self, job: &Job) -> bool {
        match self {
            Query::And(inner) => inner.iter().all(|query| query.matches(job)),
            Query::Or(inner) => inner.iter().any(|query| query.matches(job)),
            Query::Not(inner) => !inner.matches(job),
            Query::IdEquals(id) => job.id == *id,
            Query::IdIn(ids) => ids.contains(&job.id),
            Query::CommandEquals(command) => job.command == *command,
            Query::CommandIn(commands) => commands.iter().any(|c| job.command == *c),
            Query::ArgsEqual(args) => job.args == *args,
            Query::StateEquals(state) => job.state == *state,
            Query::QueueIn(queues) => queues.iter().any(|q| job.queue == *q),
            Query::DependenciesEqual(ids) => {
                job.dependencies.len() == ids.len()
                    && ids.iter().all(|id| job.dependencies.contains(id))
            }
            Query::DependsOn(id) => job.dependencies.contains(id),
            Query::RelatedTo(entity) => job.related_entities.contains(entity),
            Query::DueBy(instant) => job.is_due(*instant),
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeDelta, Utc};

    use crate::job::{EntityRef, JobState, NewJob};
    use crate::store::memory::test::persisted;

    use super::*;

    #[test]
    fn query_matches() {
        let job = persisted(
            1,
            NewJob::new("a")
                .with_args(vec!["foo"])
                .related_to(EntityRef::new("wagon", 7)),
        );

        let ids = [job.id, 42.into()];
        let entity = EntityRef::new("wagon", 7);
        let args = vec!["foo".to_owned()];
        let matching = [
            Query::IdEquals(job.id),
            Query::IdIn(&ids),
            Query::CommandEquals("a"),
            Query::CommandIn(&["a", "b"]),
            Query::ArgsEqual(&args),
            Query::StateEquals(JobState::Pending),
            Query::QueueIn(&["default"]),
            Query::DependenciesEqual(&[]),
            Query::RelatedTo(&entity),
            Query::DueBy(Utc::now()),
        ];

        for query in matching.clone() {
            assert!(query.matches(&job), "{query:?} should match");
            assert!(!Query::Not(Box::new(query)).matches(&job));
        }
        assert!(Query::And(matching.to_vec()).matches(&job));
        assert!(Query::Or(matching.to_vec()).matches(&job));

        let other_ids = [42.into()];
        let other_entity = EntityRef::new("train", 7);
        let other_args = vec!["bar".to_owned()];
        let non_matching = [
            Query::IdEquals(42.into()),
            Query::IdIn(&other_ids),
            Query::CommandEquals("b"),
            Query::CommandIn(&["b"]),
            Query::ArgsEqual(&other_args),
            Query::StateEquals(JobState::Running),
            Query::QueueIn(&["other_queue"]),
            Query::DependenciesEqual(&other_ids),
            Query::DependsOn(job.id),
            Query::RelatedTo(&other_entity),
        ];

        for query in non_matching.clone() {
            assert!(!query.matches(&job), "{query:?} should not match");
            assert!(Query::Not(Box::new(query)).matches(&job));
        }
        assert!(!Query::And(non_matching.to_vec()).matches(&job));
        assert!(!Query::Or(non_matching.to_vec()).matches(&job));
    }

    #[test]
    fn dependencies_equal_is_order_insensitive() {
        let job = persisted(
            3,
            NewJob::new("c").with_dependencies(vec![1.into(), 2.into()]),
        );

        assert!(Query::DependenciesEqual(&[2.into(), 1.into()]).matches(&job));
        assert!(!Query::DependenciesEqual(&[1.into()]).matches(&job));
        assert!(!Query::DependenciesEqual(&[1.into(), 2.into(), 3.into()]).matches(&job));
    }

    #[test]
    fn due_by_respects_execute_after() {
        let now = Utc::now();
        let job = persisted(1, NewJob::new("a").execute_after(now + TimeDelta::hours(1)));

        assert!(!Query::DueBy(now).matches(&job));
        assert!(Query::DueBy(now + TimeDelta::hours(2)).matches(&job));
    }
}
