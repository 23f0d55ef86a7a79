use chrono::{DateTime, Utc};

use crate::lifecycle::completion_timestamp;
use crate::model::ProjectStatus;

/// Emitted whenever a project's task set was created, edited or deleted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaskSetChanged {
    pub project_id: i64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TaskTally {
    pub done: u64,
    pub total: u64,
}

impl TaskTally {
    pub fn progress(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.done as f64 / self.total as f64) * 100.0)
    }
}

/// The project fields owned by the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectState {
    pub status: ProjectStatus,
    pub progress: f64,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Applies task-derived progress and status automation to `state`.
///
/// A taskless project is returned untouched. Otherwise rules are evaluated in
/// order and the first match wins:
/// 1. progress >= 100 forces `Completed`, even from `OnHold` or `Cancelled`;
/// 2. progress > 0 moves `NotStarted` to `InProgress`;
/// 3. progress < 100 reopens `Completed` as `InProgress`.
///
/// The resulting status is saved through [`completion_timestamp`] against the
/// incoming status, so the stamp follows the same rule as a direct edit.
pub fn recompute(state: &ProjectState, tally: TaskTally, now: DateTime<Utc>) -> ProjectState {
    let Some(progress) = tally.progress() else {
        return *state;
    };
    let mut completed_at = state.completed_at;

    let status = if progress >= 100.0 {
        ProjectStatus::Completed
    } else if progress > 0.0 && state.status == ProjectStatus::NotStarted {
        completed_at = None;
        ProjectStatus::InProgress
    } else if state.status == ProjectStatus::Completed {
        completed_at = None;
        ProjectStatus::InProgress
    } else {
        state.status
    };

    ProjectState {
        status,
        progress,
        completed_at: completion_timestamp(Some(state.status), status, completed_at, now),
    }
}

pub fn describe(tally: TaskTally) -> String {
    if tally.total == 0 {
        return "no tasks".to_string();
    }
    if tally.done == tally.total {
        format!("all tasks are done ({}/{})", tally.done, tally.total)
    } else {
        format!("tasks done {}/{}", tally.done, tally.total)
    }
}
