//! State-change notification delivery.

use crate::job::{Job, JobState};

/// Receives every observed state transition, synchronously and in cascade
/// order: a prerequisite's own closure is always announced before its
/// dependents'.
///
/// The notifier is handed to [`crate::manager::JobManager`] at construction
/// rather than reached through global state, so tests can assert on delivery
/// order deterministically.
#[cfg_attr(test, mockall::automock)]
pub trait EventNotifier: Send + Sync {
    fn notify(&self, job: &Job, new_state: JobState);
}

/// Discards all notifications.
pub struct NullNotifier;

impl EventNotifier for NullNotifier {
    fn notify(&self, _job: &Job, _new_state: JobState) {}
}
