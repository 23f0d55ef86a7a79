use chrono::{DateTime, NaiveDate, Utc};

use crate::model::ProjectStatus;

/// Completion timestamp a project should carry after a save.
///
/// `previous` is the status persisted right before the write, or `None` when the
/// project is being created. Entering `Completed` stamps `now`, leaving it clears
/// the stamp, and any other change keeps `current`.
pub fn completion_timestamp(
    previous: Option<ProjectStatus>,
    next: ProjectStatus,
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let was_completed = previous == Some(ProjectStatus::Completed);
    let is_completed = next == ProjectStatus::Completed;
    match (previous, was_completed, is_completed) {
        (None, _, true) => Some(now),
        (Some(_), false, true) => Some(now),
        (Some(_), true, false) => None,
        _ => current,
    }
}

pub fn is_overdue(deadline: NaiveDate, status: ProjectStatus, today: NaiveDate) -> bool {
    deadline < today && status != ProjectStatus::Completed
}

pub fn is_reminder_overdue(reminder_date: NaiveDate, is_sent: bool, today: NaiveDate) -> bool {
    reminder_date < today && !is_sent
}
