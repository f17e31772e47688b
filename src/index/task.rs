use crate::index::settings::SettingsGroup;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of an asynchronous backend task:
/// `Enqueued -> Processing -> Succeeded | Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Enqueued,
    Processing,
    Succeeded,
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed(_))
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Enqueued => 0,
            TaskState::Processing => 1,
            TaskState::Succeeded | TaskState::Failed(_) => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskProgress {
    Pending,
    Succeeded,
    Failed(String),
}

/// Client-side view of one asynchronous backend task. Observed states only
/// move forward; a terminal state is never left. `subject` names what the
/// task changes and only shows up in logs and errors.
#[derive(Debug, Clone)]
pub struct BackendTask<S> {
    pub task_id: String,
    pub subject: S,
    state: TaskState,
    polls: u32,
}

/// A task carrying one settings group update.
pub type SettingsTask = BackendTask<SettingsGroup>;

impl<S: fmt::Display> BackendTask<S> {
    pub fn new(task_id: impl Into<String>, subject: S) -> Self {
        BackendTask {
            task_id: task_id.into(),
            subject,
            state: TaskState::Enqueued,
            polls: 0,
        }
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Record a state reported by the backend and say whether to keep polling.
    pub fn observe(&mut self, reported: TaskState) -> TaskProgress {
        self.polls += 1;
        if self.state.is_terminal() {
            return self.progress();
        }
        if reported.rank() < self.state.rank() {
            tracing::warn!(
                "[TASK {}] {} reported {:?} after {:?}, ignoring",
                self.task_id,
                self.subject,
                reported,
                self.state
            );
            return self.progress();
        }
        if reported != self.state {
            tracing::debug!(
                "[TASK {}] {} {:?} -> {:?}",
                self.task_id,
                self.subject,
                self.state,
                reported
            );
        }
        self.state = reported;
        self.progress()
    }

    fn progress(&self) -> TaskProgress {
        match &self.state {
            TaskState::Enqueued | TaskState::Processing => TaskProgress::Pending,
            TaskState::Succeeded => TaskProgress::Succeeded,
            TaskState::Failed(message) => TaskProgress::Failed(message.clone()),
        }
    }
}

/// Exponential backoff: each delay doubles, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            next: initial.min(max),
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> SettingsTask {
        SettingsTask::new("7", SettingsGroup::FilterableAttributes)
    }

    #[test]
    fn walks_to_success() {
        let mut t = task();
        assert_eq!(t.observe(TaskState::Enqueued), TaskProgress::Pending);
        assert_eq!(t.observe(TaskState::Processing), TaskProgress::Pending);
        assert_eq!(t.observe(TaskState::Succeeded), TaskProgress::Succeeded);
        assert_eq!(t.polls(), 3);
    }

    #[test]
    fn failure_carries_message() {
        let mut t = task();
        assert_eq!(
            t.observe(TaskState::Failed("bad attribute".into())),
            TaskProgress::Failed("bad attribute".into())
        );
    }

    #[test]
    fn regression_is_ignored() {
        let mut t = task();
        t.observe(TaskState::Processing);
        assert_eq!(t.observe(TaskState::Enqueued), TaskProgress::Pending);
        assert_eq!(t.state(), &TaskState::Processing);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut t = task();
        t.observe(TaskState::Succeeded);
        assert_eq!(
            t.observe(TaskState::Failed("late".into())),
            TaskProgress::Succeeded
        );
        assert_eq!(t.state(), &TaskState::Succeeded);
    }

    #[test]
    fn any_subject_can_be_tracked() {
        let mut t = BackendTask::new("9", "user_profiles documents");
        assert_eq!(t.observe(TaskState::Processing), TaskProgress::Pending);
        assert_eq!(
            t.observe(TaskState::Failed("document too large".into())),
            TaskProgress::Failed("document too large".into())
        );
        assert_eq!(t.subject, "user_profiles documents");
    }

    #[test]
    fn backoff_doubles_to_cap() {
        let mut b = Backoff::new(Duration::from_millis(200), Duration::from_secs(1));
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn backoff_initial_above_cap_is_clamped() {
        let mut b = Backoff::new(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
    }
}
