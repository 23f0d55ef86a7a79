use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::entities::{project, reminder, task};
use crate::error::AppError;
use crate::lifecycle::{completion_timestamp, is_overdue, is_reminder_overdue};
use crate::model::{
    ProjectChanges, ProjectInput, ProjectQuery, ProjectStatus, ReminderInput, TaskChanges,
    TaskInput, TaskStatus,
};
use crate::progress::{self, ProjectState, TaskSetChanged, TaskTally};
use crate::report::{self, ExportRow, ReportSummary};

const UPCOMING_WINDOW_DAYS: i64 = 7;

pub struct App {
    db: DatabaseConnection,
    owner: String,
    clock: Arc<dyn Clock>,
    locks: ProjectLocks,
}

pub struct ProjectDetail {
    pub project: project::Model,
    pub tasks: Vec<task::Model>,
    pub reminders: Vec<reminder::Model>,
}

pub struct ReminderDetail {
    pub reminder: reminder::Model,
    pub project_name: String,
    pub overdue: bool,
}

pub struct Dashboard {
    pub total_projects: u64,
    pub active_projects: u64,
    pub completed_projects: u64,
    pub overdue_projects: u64,
    pub upcoming_deadlines: Vec<project::Model>,
}

#[derive(Clone, Debug)]
pub struct ProgressChange {
    pub project_id: i64,
    pub from_status: String,
    pub to_status: String,
    pub from_progress: f64,
    pub to_progress: f64,
    pub reason: String,
}

#[derive(Default, Debug)]
pub struct ProgressChanges {
    pub projects: Vec<ProgressChange>,
}

impl ProgressChanges {
    pub fn merge(&mut self, other: ProgressChanges) {
        self.projects.extend(other.projects);
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Serialises recompute-then-save per project within this process.
#[derive(Default)]
struct ProjectLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectLocks {
    async fn acquire(&self, project_ids: &[i64]) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        let mut ids = unique_ids(project_ids);
        // Fixed order so multi-project deletes cannot deadlock each other.
        ids.sort_unstable();
        let handles: Vec<_> = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            ids.iter()
                .map(|id| Arc::clone(map.entry(*id).or_default()))
                .collect()
        };
        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        guards
    }
}

impl App {
    pub fn new(db: DatabaseConnection, owner: String, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            owner,
            clock,
            locks: ProjectLocks::default(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn add_project(&self, input: ProjectInput) -> Result<project::Model, AppError> {
        ensure_non_empty("project name", &input.name)?;
        let now = self.clock.now();
        let active = project::ActiveModel {
            owner: Set(self.owner.clone()),
            name: Set(input.name.trim().to_string()),
            client: Set(normalize_optional(input.client)),
            description: Set(normalize_optional(input.description)),
            start_date: Set(input.start_date.unwrap_or_else(|| self.clock.today())),
            deadline: Set(input.deadline),
            status: Set(input.status.as_str().to_string()),
            progress: Set(0.0),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(completion_timestamp(None, input.status, None, now)),
            ..Default::default()
        };

        let insert = project::Entity::insert(active).exec(&self.db).await?;
        let created = project::Entity::find_by_id(insert.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("project not found after insert".to_string()))?;
        info!(project_id = created.id, status = %created.status, "project created");
        Ok(created)
    }

    pub async fn list_projects(
        &self,
        query: &ProjectQuery,
    ) -> Result<Vec<project::Model>, AppError> {
        let mut select =
            project::Entity::find().filter(project::Column::Owner.eq(self.owner.as_str()));
        if let Some(status) = query.status {
            select = select.filter(project::Column::Status.eq(status.as_str()));
        }
        if let Some(term) = query.search.as_deref().map(str::trim) {
            if !term.is_empty() {
                select = select.filter(
                    Condition::any()
                        .add(project::Column::Name.contains(term))
                        .add(project::Column::Client.contains(term))
                        .add(project::Column::Description.contains(term)),
                );
            }
        }
        Ok(select
            .order_by_desc(project::Column::Deadline)
            .order_by_asc(project::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn get_project(&self, id: i64) -> Result<project::Model, AppError> {
        self.owned_project_with_conn(&self.db, id).await
    }

    pub async fn get_project_detail(&self, id: i64) -> Result<ProjectDetail, AppError> {
        let project = self.get_project(id).await?;
        let tasks = task::Entity::find()
            .filter(task::Column::ProjectId.eq(id))
            .order_by_asc(task::Column::Id)
            .all(&self.db)
            .await?;
        let reminders = reminder::Entity::find()
            .filter(reminder::Column::ProjectId.eq(id))
            .order_by_asc(reminder::Column::ReminderDate)
            .order_by_asc(reminder::Column::Id)
            .all(&self.db)
            .await?;
        Ok(ProjectDetail {
            project,
            tasks,
            reminders,
        })
    }

    pub async fn update_project(
        &self,
        id: i64,
        changes: ProjectChanges,
    ) -> Result<(project::Model, ProgressChanges), AppError> {
        if let Some(name) = changes.name.as_deref() {
            ensure_non_empty("project name", name)?;
        }
        if let Some(progress) = changes.progress {
            ensure_progress_in_range(progress)?;
        }

        let _guards = self.locks.acquire(&[id]).await;
        let txn = self.db.begin().await?;
        let result = self.update_project_with_conn(&txn, id, changes).await;
        finalize_transaction(txn, result).await
    }

    async fn update_project_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i64,
        changes: ProjectChanges,
    ) -> Result<(project::Model, ProgressChanges), AppError> {
        let previous = self.owned_project_with_conn(db, id).await?;
        let previous_status: ProjectStatus = previous.status.parse()?;
        let now = self.clock.now();

        let mut active = project::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        if let Some(name) = changes.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(client) = changes.client {
            active.client = Set(normalize_optional(Some(client)));
        }
        if let Some(description) = changes.description {
            active.description = Set(normalize_optional(Some(description)));
        }
        if let Some(start_date) = changes.start_date {
            active.start_date = Set(start_date);
        }
        if let Some(deadline) = changes.deadline {
            active.deadline = Set(deadline);
        }
        if let Some(status) = changes.status {
            active.status = Set(status.as_str().to_string());
            active.completed_at = Set(completion_timestamp(
                Some(previous_status),
                status,
                previous.completed_at,
                now,
            ));
        }
        if let Some(progress) = changes.progress {
            active.progress = Set(progress);
        }
        active.updated_at = Set(now);

        let model = match active.update(db).await {
            Ok(model) => model,
            Err(sea_orm::DbErr::RecordNotFound(_)) | Err(sea_orm::DbErr::RecordNotUpdated) => {
                return Err(AppError::NotFound(format!("project id {id}")));
            }
            Err(err) => return Err(err.into()),
        };
        if model.status != previous.status {
            info!(
                project_id = id,
                from = %previous.status,
                to = %model.status,
                "project status edited"
            );
        }

        if changes.progress.is_none() {
            return Ok((model, ProgressChanges::default()));
        }
        let updates = self
            .on_task_set_changed(db, TaskSetChanged { project_id: id })
            .await?;
        let model = self.owned_project_with_conn(db, id).await?;
        Ok((model, updates))
    }

    pub async fn delete_project(&self, id: i64) -> Result<(), AppError> {
        let _guards = self.locks.acquire(&[id]).await;
        let txn = self.db.begin().await?;
        let result: Result<(), AppError> = async {
            self.owned_project_with_conn(&txn, id).await?;
            reminder::Entity::delete_many()
                .filter(reminder::Column::ProjectId.eq(id))
                .exec(&txn)
                .await?;
            task::Entity::delete_many()
                .filter(task::Column::ProjectId.eq(id))
                .exec(&txn)
                .await?;
            let result = project::Entity::delete_many()
                .filter(project::Column::Id.eq(id))
                .filter(project::Column::Owner.eq(self.owner.as_str()))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                return Err(AppError::NotFound(format!("project id {id}")));
            }
            Ok(())
        }
        .await;

        finalize_transaction(txn, result).await?;
        info!(project_id = id, "project removed");
        Ok(())
    }

    /// Recomputes progress for one project outside any task mutation.
    pub async fn recompute_project(&self, id: i64) -> Result<ProgressChanges, AppError> {
        let _guards = self.locks.acquire(&[id]).await;
        let txn = self.db.begin().await?;
        let result = self
            .on_task_set_changed(&txn, TaskSetChanged { project_id: id })
            .await;
        finalize_transaction(txn, result).await
    }

    pub async fn add_task(
        &self,
        project_id: i64,
        input: TaskInput,
    ) -> Result<(task::Model, ProgressChanges), AppError> {
        ensure_non_empty("task title", &input.title)?;

        let _guards = self.locks.acquire(&[project_id]).await;
        let txn = self.db.begin().await?;
        let result: Result<(task::Model, ProgressChanges), AppError> = async {
            self.owned_project_with_conn(&txn, project_id).await?;
            let now = self.clock.now();
            let active = task::ActiveModel {
                project_id: Set(project_id),
                title: Set(input.title.trim().to_string()),
                description: Set(normalize_optional(input.description)),
                status: Set(input.status.as_str().to_string()),
                due_date: Set(input.due_date),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };
            let insert = task::Entity::insert(active).exec(&txn).await?;
            let model = task::Entity::find_by_id(insert.last_insert_id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound("task not found after insert".to_string()))?;

            let changes = self
                .on_task_set_changed(&txn, TaskSetChanged { project_id })
                .await?;
            Ok((model, changes))
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn list_tasks(
        &self,
        project_id: i64,
        status: Option<TaskStatus>,
    ) -> Result<Vec<task::Model>, AppError> {
        self.get_project(project_id).await?;
        let mut select = task::Entity::find().filter(task::Column::ProjectId.eq(project_id));
        if let Some(status) = status {
            select = select.filter(task::Column::Status.eq(status.as_str()));
        }
        Ok(select.order_by_asc(task::Column::Id).all(&self.db).await?)
    }

    pub async fn get_task(&self, id: i64) -> Result<task::Model, AppError> {
        self.owned_task_with_conn(&self.db, id).await
    }

    pub async fn update_task(
        &self,
        id: i64,
        changes: TaskChanges,
    ) -> Result<(task::Model, ProgressChanges), AppError> {
        if let Some(title) = changes.title.as_deref() {
            ensure_non_empty("task title", title)?;
        }
        let project_id = self.get_task(id).await?.project_id;

        let _guards = self.locks.acquire(&[project_id]).await;
        let txn = self.db.begin().await?;
        let result = self.update_task_with_conn(&txn, id, changes).await;
        finalize_transaction(txn, result).await
    }

    async fn update_task_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i64,
        changes: TaskChanges,
    ) -> Result<(task::Model, ProgressChanges), AppError> {
        self.owned_task_with_conn(db, id).await?;

        let mut active = task::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        if let Some(title) = changes.title {
            active.title = Set(title.trim().to_string());
        }
        if let Some(description) = changes.description {
            active.description = Set(normalize_optional(Some(description)));
        }
        if let Some(status) = changes.status {
            active.status = Set(status.as_str().to_string());
        }
        if let Some(due_date) = changes.due_date {
            active.due_date = Set(Some(due_date));
        }
        active.updated_at = Set(self.clock.now());

        match active.update(db).await {
            Ok(model) => {
                let updates = self
                    .on_task_set_changed(
                        db,
                        TaskSetChanged {
                            project_id: model.project_id,
                        },
                    )
                    .await?;
                Ok((model, updates))
            }
            Err(sea_orm::DbErr::RecordNotFound(_)) | Err(sea_orm::DbErr::RecordNotUpdated) => {
                Err(AppError::NotFound(format!("task id {id}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn set_task_status(
        &self,
        id: i64,
        status: TaskStatus,
    ) -> Result<(task::Model, ProgressChanges), AppError> {
        self.update_task(
            id,
            TaskChanges {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_tasks(&self, ids: &[i64]) -> Result<(u64, ProgressChanges), AppError> {
        if ids.is_empty() {
            return Ok((0, ProgressChanges::default()));
        }
        let unique_ids = unique_ids(ids);
        let tasks = self.owned_tasks_with_conn(&self.db, &unique_ids).await?;
        let existing: HashSet<i64> = tasks.iter().map(|task| task.id).collect();
        let missing: Vec<i64> = unique_ids
            .iter()
            .cloned()
            .filter(|id| !existing.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::NotFound(format!(
                "task id(s) not found: {}",
                join_ids(&missing)
            )));
        }
        let mut seen = HashSet::new();
        let mut project_ids = Vec::new();
        for task in &tasks {
            if seen.insert(task.project_id) {
                project_ids.push(task.project_id);
            }
        }

        let _guards = self.locks.acquire(&project_ids).await;
        let txn = self.db.begin().await?;
        let result: Result<(u64, ProgressChanges), AppError> = async {
            let result = task::Entity::delete_many()
                .filter(task::Column::Id.is_in(unique_ids))
                .exec(&txn)
                .await?;

            let mut changes = ProgressChanges::default();
            for project_id in &project_ids {
                let updated = self
                    .on_task_set_changed(
                        &txn,
                        TaskSetChanged {
                            project_id: *project_id,
                        },
                    )
                    .await?;
                changes.merge(updated);
            }
            Ok((result.rows_affected, changes))
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn add_reminder(&self, input: ReminderInput) -> Result<reminder::Model, AppError> {
        if let Some(message) = input.message.as_deref() {
            ensure_non_empty("reminder message", message)?;
        }
        self.get_project(input.project_id).await?;
        let active = reminder::ActiveModel {
            project_id: Set(input.project_id),
            reminder_date: Set(input.reminder_date),
            message: Set(normalize_optional(input.message)),
            is_sent: Set(false),
            created_at: Set(self.clock.now()),
            ..Default::default()
        };
        let insert = reminder::Entity::insert(active).exec(&self.db).await?;
        reminder::Entity::find_by_id(insert.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("reminder not found after insert".to_string()))
    }

    pub async fn list_reminders(&self) -> Result<Vec<ReminderDetail>, AppError> {
        let today = self.clock.today();
        let rows = reminder::Entity::find()
            .find_also_related(project::Entity)
            .filter(project::Column::Owner.eq(self.owner.as_str()))
            .order_by_asc(reminder::Column::ReminderDate)
            .order_by_asc(reminder::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(reminder, project)| {
                let project = project?;
                let overdue =
                    is_reminder_overdue(reminder.reminder_date, reminder.is_sent, today);
                Some(ReminderDetail {
                    reminder,
                    project_name: project.name,
                    overdue,
                })
            })
            .collect())
    }

    pub async fn mark_reminder_sent(&self, id: i64) -> Result<reminder::Model, AppError> {
        reminder::Entity::find_by_id(id)
            .inner_join(project::Entity)
            .filter(project::Column::Owner.eq(self.owner.as_str()))
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reminder id {id}")))?;
        let mut active = reminder::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.is_sent = Set(true);
        Ok(active.update(&self.db).await?)
    }

    pub async fn dashboard(&self) -> Result<Dashboard, AppError> {
        let today = self.clock.today();
        let owned =
            || project::Entity::find().filter(project::Column::Owner.eq(self.owner.as_str()));
        let completed = ProjectStatus::Completed.as_str();

        let total_projects = owned().count(&self.db).await?;
        let active_projects = owned()
            .filter(project::Column::Status.eq(ProjectStatus::InProgress.as_str()))
            .count(&self.db)
            .await?;
        let completed_projects = owned()
            .filter(project::Column::Status.eq(completed))
            .count(&self.db)
            .await?;
        let overdue_projects = owned()
            .filter(project::Column::Deadline.lt(today))
            .filter(project::Column::Status.ne(completed))
            .count(&self.db)
            .await?;
        let horizon = today + Duration::days(UPCOMING_WINDOW_DAYS);
        let upcoming_deadlines = owned()
            .filter(project::Column::Deadline.between(today, horizon))
            .filter(project::Column::Status.ne(completed))
            .order_by_asc(project::Column::Deadline)
            .order_by_asc(project::Column::Id)
            .all(&self.db)
            .await?;

        Ok(Dashboard {
            total_projects,
            active_projects,
            completed_projects,
            overdue_projects,
            upcoming_deadlines,
        })
    }

    pub fn is_overdue(&self, project: &project::Model) -> Result<bool, AppError> {
        let status: ProjectStatus = project.status.parse()?;
        Ok(is_overdue(project.deadline, status, self.clock.today()))
    }

    pub async fn report(&self) -> Result<ReportSummary, AppError> {
        let projects = self.owned_projects().await?;
        let summary = report::build_report(&projects, self.clock.today());
        debug!(
            owner = %self.owner,
            total = summary.total_projects,
            completed = summary.completed_count,
            "report built"
        );
        Ok(summary)
    }

    pub async fn export_rows(&self) -> Result<Vec<ExportRow>, AppError> {
        let projects = project::Entity::find()
            .filter(project::Column::Owner.eq(self.owner.as_str()))
            .filter(project::Column::Status.eq(ProjectStatus::Completed.as_str()))
            .all(&self.db)
            .await?;
        Ok(report::export_rows(&projects))
    }

    async fn owned_projects(&self) -> Result<Vec<project::Model>, AppError> {
        Ok(project::Entity::find()
            .filter(project::Column::Owner.eq(self.owner.as_str()))
            .order_by_asc(project::Column::Id)
            .all(&self.db)
            .await?)
    }
}

impl App {
    /// Progress Engine entry point; runs inside the caller's unit of work.
    async fn on_task_set_changed<C: ConnectionTrait>(
        &self,
        db: &C,
        event: TaskSetChanged,
    ) -> Result<ProgressChanges, AppError> {
        let project_id = event.project_id;
        let project = self.owned_project_with_conn(db, project_id).await?;
        let tally = self.task_tally_with_conn(db, project_id).await?;
        let before = project_state(&project)?;
        let now = self.clock.now();
        let after = progress::recompute(&before, tally, now);

        let mut changes = ProgressChanges::default();
        if after == before {
            debug!(project_id, done = tally.done, total = tally.total, "progress unchanged");
            return Ok(changes);
        }

        let mut active = project::ActiveModel {
            id: Set(project_id),
            ..Default::default()
        };
        active.status = Set(after.status.as_str().to_string());
        active.progress = Set(after.progress);
        active.completed_at = Set(after.completed_at);
        active.updated_at = Set(now);
        active.update(db).await?;

        let reason = progress::describe(tally);
        if after.status != before.status {
            info!(
                project_id,
                from = %before.status,
                to = %after.status,
                reason = %reason,
                "project status auto-updated"
            );
        }
        changes.projects.push(ProgressChange {
            project_id,
            from_status: before.status.as_str().to_string(),
            to_status: after.status.as_str().to_string(),
            from_progress: before.progress,
            to_progress: after.progress,
            reason,
        });
        Ok(changes)
    }

    async fn task_tally_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: i64,
    ) -> Result<TaskTally, AppError> {
        let total = task::Entity::find()
            .filter(task::Column::ProjectId.eq(project_id))
            .count(db)
            .await?;
        let done = task::Entity::find()
            .filter(task::Column::ProjectId.eq(project_id))
            .filter(task::Column::Status.eq(TaskStatus::Done.as_str()))
            .count(db)
            .await?;
        Ok(TaskTally { done, total })
    }

    async fn owned_project_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i64,
    ) -> Result<project::Model, AppError> {
        project::Entity::find_by_id(id)
            .filter(project::Column::Owner.eq(self.owner.as_str()))
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project id {id}")))
    }

    async fn owned_task_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i64,
    ) -> Result<task::Model, AppError> {
        task::Entity::find_by_id(id)
            .inner_join(project::Entity)
            .filter(project::Column::Owner.eq(self.owner.as_str()))
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task id {id}")))
    }

    async fn owned_tasks_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        ids: &[i64],
    ) -> Result<Vec<task::Model>, AppError> {
        Ok(task::Entity::find()
            .filter(task::Column::Id.is_in(ids.to_vec()))
            .inner_join(project::Entity)
            .filter(project::Column::Owner.eq(self.owner.as_str()))
            .all(db)
            .await?)
    }
}

fn project_state(project: &project::Model) -> Result<ProjectState, AppError> {
    Ok(ProjectState {
        status: project.status.parse()?,
        progress: project.progress,
        completed_at: project.completed_at,
    })
}

async fn finalize_transaction<T>(
    txn: DatabaseTransaction,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                return Err(rollback_err.into());
            }
            Err(err)
        }
    }
}

fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for id in ids {
        if seen.insert(*id) {
            unique.push(*id);
        }
    }
    unique
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn ensure_non_empty(label: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        warn!(field = label, "rejected empty value");
        return Err(AppError::InvalidInput(format!("{label} cannot be empty")));
    }
    Ok(())
}

fn ensure_progress_in_range(progress: f64) -> Result<(), AppError> {
    if !progress.is_finite() || !(0.0..=100.0).contains(&progress) {
        warn!(progress, "rejected out-of-range progress");
        return Err(AppError::InvalidInput(format!(
            "progress must be between 0 and 100, got {progress}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use tempfile::TempDir;

    const OWNER: &str = "alice";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    async fn connect(dir: &TempDir) -> DatabaseConnection {
        let db_path = db::resolve_db_path(dir.path());
        db::ensure_parent_dir(&db_path).expect("ensure parent");
        let db = db::connect(&db_path).await.expect("connect db");
        db::ensure_schema(&db).await.expect("ensure schema");
        db
    }

    async fn setup_app() -> (TempDir, App) {
        let dir = TempDir::new().expect("temp dir");
        let db = connect(&dir).await;
        let app = App::new(db, OWNER.to_string(), Arc::new(FixedClock(now())));
        (dir, app)
    }

    async fn app_for(dir: &TempDir, owner: &str) -> App {
        let db = connect(dir).await;
        App::new(db, owner.to_string(), Arc::new(FixedClock(now())))
    }

    fn project_input(name: &str, status: ProjectStatus) -> ProjectInput {
        ProjectInput {
            name: name.to_string(),
            client: None,
            description: None,
            start_date: Some(date(2024, 5, 1)),
            deadline: date(2024, 7, 1),
            status,
        }
    }

    async fn create_project(app: &App, name: &str) -> project::Model {
        app.add_project(project_input(name, ProjectStatus::NotStarted))
            .await
            .expect("add project")
    }

    async fn add_task(app: &App, project_id: i64, title: &str, status: TaskStatus) -> task::Model {
        let (task, _) = app
            .add_task(
                project_id,
                TaskInput {
                    title: title.to_string(),
                    description: None,
                    status,
                    due_date: None,
                },
            )
            .await
            .expect("add task");
        task
    }

    fn assert_completion_invariant(project: &project::Model) {
        assert_eq!(
            project.completed_at.is_some(),
            project.status == ProjectStatus::Completed.as_str(),
            "completed_at/status mismatch for project {}: {:?} / {}",
            project.id,
            project.completed_at,
            project.status
        );
    }

    #[tokio::test]
    async fn task_lifecycle_drives_project_status() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Website").await;

        let first = add_task(&app, project.id, "Design", TaskStatus::Todo).await;
        let second = add_task(&app, project.id, "Build", TaskStatus::Todo).await;
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.progress, 0.0);
        assert_eq!(current.status, ProjectStatus::NotStarted.as_str());
        assert_completion_invariant(&current);

        let (_, changes) = app
            .set_task_status(first.id, TaskStatus::Done)
            .await
            .expect("first done");
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.progress, 50.0);
        assert_eq!(current.status, ProjectStatus::InProgress.as_str());
        assert_completion_invariant(&current);
        assert_eq!(changes.projects.len(), 1);
        assert_eq!(changes.projects[0].from_status, "NOT_STARTED");
        assert_eq!(changes.projects[0].to_status, "IN_PROGRESS");

        app.set_task_status(second.id, TaskStatus::Done)
            .await
            .expect("second done");
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.progress, 100.0);
        assert_eq!(current.status, ProjectStatus::Completed.as_str());
        assert_eq!(current.completed_at, Some(now()));

        app.set_task_status(first.id, TaskStatus::Todo)
            .await
            .expect("reopen");
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.progress, 50.0);
        assert_eq!(current.status, ProjectStatus::InProgress.as_str());
        assert_eq!(current.completed_at, None);
    }

    #[tokio::test]
    async fn taskless_project_is_not_touched_by_recompute() {
        let (_dir, app) = setup_app().await;
        let project = app
            .add_project(project_input("Idle", ProjectStatus::OnHold))
            .await
            .expect("add project");

        let changes = app.recompute_project(project.id).await.expect("recompute");
        assert!(changes.is_empty());
        let after = app.get_project(project.id).await.expect("get project");
        assert_eq!(after, project);
    }

    #[tokio::test]
    async fn recompute_twice_yields_same_state() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Twice").await;
        add_task(&app, project.id, "One", TaskStatus::Done).await;
        add_task(&app, project.id, "Two", TaskStatus::Todo).await;
        add_task(&app, project.id, "Three", TaskStatus::InProgress).await;

        app.recompute_project(project.id).await.expect("first");
        let once = app.get_project(project.id).await.expect("get project");
        let changes = app.recompute_project(project.id).await.expect("second");
        let twice = app.get_project(project.id).await.expect("get project");
        assert!(changes.is_empty());
        assert_eq!(once, twice);
        assert_eq!(twice.progress, (1.0 / 3.0) * 100.0);
    }

    #[tokio::test]
    async fn finishing_all_tasks_completes_on_hold_project() {
        let (_dir, app) = setup_app().await;
        let project = app
            .add_project(project_input("Paused", ProjectStatus::OnHold))
            .await
            .expect("add project");
        let task = add_task(&app, project.id, "Only", TaskStatus::Todo).await;
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.status, ProjectStatus::OnHold.as_str());

        app.set_task_status(task.id, TaskStatus::Done)
            .await
            .expect("done");
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.status, ProjectStatus::Completed.as_str());
        assert_completion_invariant(&current);
    }

    #[tokio::test]
    async fn deleting_last_open_task_completes_project() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Trim").await;
        add_task(&app, project.id, "Done", TaskStatus::Done).await;
        let open = add_task(&app, project.id, "Open", TaskStatus::Todo).await;

        let (deleted, changes) = app.delete_tasks(&[open.id]).await.expect("delete");
        assert_eq!(deleted, 1);
        assert_eq!(changes.projects[0].to_status, "COMPLETED");
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.progress, 100.0);
        assert_completion_invariant(&current);
    }

    #[tokio::test]
    async fn deleting_every_task_keeps_last_progress() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Empty").await;
        let done = add_task(&app, project.id, "Done", TaskStatus::Done).await;
        let open = add_task(&app, project.id, "Open", TaskStatus::Todo).await;

        app.delete_tasks(&[done.id, open.id, done.id])
            .await
            .expect("delete");
        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.progress, 50.0);
        assert_eq!(current.status, ProjectStatus::InProgress.as_str());
    }

    #[tokio::test]
    async fn delete_tasks_errors_on_missing_ids() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Missing").await;
        let task = add_task(&app, project.id, "Keep", TaskStatus::Todo).await;

        let err = app.delete_tasks(&[task.id, 9999]).await.unwrap_err();
        match err {
            AppError::NotFound(message) => assert!(message.contains("task id(s) not found: 9999")),
            _ => panic!("unexpected error type"),
        }
        app.get_task(task.id).await.expect("task still exists");
    }

    #[tokio::test]
    async fn direct_status_edits_maintain_completion_stamp() {
        let (_dir, app) = setup_app().await;
        let created = app
            .add_project(project_input("Done at birth", ProjectStatus::Completed))
            .await
            .expect("add project");
        assert_eq!(created.completed_at, Some(now()));

        let (reopened, _) = app
            .update_project(
                created.id,
                ProjectChanges {
                    status: Some(ProjectStatus::OnHold),
                    ..Default::default()
                },
            )
            .await
            .expect("reopen");
        assert_eq!(reopened.completed_at, None);

        let (renamed, _) = app
            .update_project(
                created.id,
                ProjectChanges {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("rename");
        assert_eq!(renamed.status, ProjectStatus::OnHold.as_str());
        assert_eq!(renamed.completed_at, None);

        let (closed, _) = app
            .update_project(
                created.id,
                ProjectChanges {
                    status: Some(ProjectStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .expect("close");
        assert_eq!(closed.completed_at, Some(now()));
        assert_completion_invariant(&closed);
    }

    #[tokio::test]
    async fn manual_progress_on_taskless_project_only_stores_value() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Manual").await;

        for progress in [40.0, 100.0] {
            let (updated, changes) = app
                .update_project(
                    project.id,
                    ProjectChanges {
                        progress: Some(progress),
                        ..Default::default()
                    },
                )
                .await
                .expect("set progress");
            assert_eq!(updated.progress, progress);
            assert_eq!(updated.status, ProjectStatus::NotStarted.as_str());
            assert_eq!(updated.completed_at, None);
            assert!(changes.is_empty());
        }
    }

    #[tokio::test]
    async fn manual_progress_yields_to_task_ratio() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Tracked").await;
        add_task(&app, project.id, "Done", TaskStatus::Done).await;
        add_task(&app, project.id, "Open", TaskStatus::Todo).await;

        let (updated, _) = app
            .update_project(
                project.id,
                ProjectChanges {
                    progress: Some(100.0),
                    ..Default::default()
                },
            )
            .await
            .expect("set progress");
        assert_eq!(updated.progress, 50.0);
        assert_eq!(updated.status, ProjectStatus::InProgress.as_str());
        assert_completion_invariant(&updated);
    }

    #[tokio::test]
    async fn recompute_leaves_taskless_completed_project_alone() {
        let (_dir, app) = setup_app().await;
        let project = app
            .add_project(project_input("Closed", ProjectStatus::Completed))
            .await
            .expect("add project");
        assert_eq!(project.progress, 0.0);

        let changes = app.recompute_project(project.id).await.expect("recompute");
        assert!(changes.is_empty());
        let after = app.get_project(project.id).await.expect("get project");
        assert_eq!(after.status, ProjectStatus::Completed.as_str());
        assert_eq!(after.completed_at, Some(now()));
        assert_eq!(after, project);
    }

    #[tokio::test]
    async fn out_of_range_progress_is_rejected_without_writes() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Bounds").await;

        for progress in [-1.0, 100.5, f64::NAN] {
            let err = app
                .update_project(
                    project.id,
                    ProjectChanges {
                        name: Some("Changed".to_string()),
                        progress: Some(progress),
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        let after = app.get_project(project.id).await.expect("get project");
        assert_eq!(after, project);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            let bytes = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            String::from_utf8_lossy(&bytes).to_string()
        }
    }

    #[test]
    fn rejected_input_is_logged_as_warning() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert!(ensure_progress_in_range(150.0).is_err());
            assert!(ensure_non_empty("task title", "  ").is_err());
            assert!(ensure_progress_in_range(50.0).is_ok());
        });

        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("rejected out-of-range progress"));
        assert!(output.contains("progress=150"));
        assert!(output.contains("rejected empty value"));
        assert!(output.contains("field=\"task title\""));
        assert_eq!(output.matches("WARN").count(), 2);
    }

    #[tokio::test]
    async fn add_project_rejects_empty_name() {
        let (_dir, app) = setup_app().await;
        let err = app
            .add_project(project_input("   ", ProjectStatus::NotStarted))
            .await
            .unwrap_err();
        match err {
            AppError::InvalidInput(message) => assert!(message.contains("project name")),
            _ => panic!("unexpected error type"),
        }
        let projects = app
            .list_projects(&ProjectQuery::default())
            .await
            .expect("list");
        assert!(projects.is_empty());
    }

    #[tokio::test]
    async fn other_owner_cannot_see_or_touch_projects() {
        let (dir, app) = setup_app().await;
        let project = create_project(&app, "Private").await;
        let task = add_task(&app, project.id, "Secret", TaskStatus::Todo).await;
        let intruder = app_for(&dir, "mallory").await;

        assert!(matches!(
            intruder.get_project(project.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            intruder
                .add_task(
                    project.id,
                    TaskInput {
                        title: "Sneaky".to_string(),
                        description: None,
                        status: TaskStatus::Done,
                        due_date: None,
                    },
                )
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            intruder.set_task_status(task.id, TaskStatus::Done).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            intruder.delete_project(project.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(intruder
            .list_projects(&ProjectQuery::default())
            .await
            .expect("list")
            .is_empty());
        assert_eq!(intruder.report().await.expect("report").total_projects, 0);

        let untouched = app.get_project(project.id).await.expect("get project");
        assert_eq!(untouched.progress, 0.0);
    }

    #[tokio::test]
    async fn delete_project_cascades_tasks_and_reminders() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Doomed").await;
        add_task(&app, project.id, "Task", TaskStatus::Todo).await;
        app.add_reminder(ReminderInput {
            project_id: project.id,
            reminder_date: date(2024, 6, 10),
            message: Some("Ping".to_string()),
        })
        .await
        .expect("add reminder");

        app.delete_project(project.id).await.expect("delete project");

        let tasks = task::Entity::find().count(&app.db).await.expect("count tasks");
        let reminders = reminder::Entity::find()
            .count(&app.db)
            .await
            .expect("count reminders");
        assert_eq!(tasks, 0);
        assert_eq!(reminders, 0);
        assert!(matches!(
            app.get_project(project.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_projects_searches_and_orders_by_deadline() {
        let (_dir, app) = setup_app().await;
        let mut early = project_input("Alpha", ProjectStatus::NotStarted);
        early.deadline = date(2024, 6, 5);
        early.client = Some("Acme Corp".to_string());
        let early = app.add_project(early).await.expect("early");
        let mut late = project_input("Beta", ProjectStatus::NotStarted);
        late.deadline = date(2024, 9, 1);
        late.description = Some("Internal acme tooling".to_string());
        let late = app.add_project(late).await.expect("late");
        create_project(&app, "Gamma").await;

        let all = app
            .list_projects(&ProjectQuery::default())
            .await
            .expect("list");
        assert_eq!(all.first().map(|project| project.id), Some(late.id));

        let found = app
            .list_projects(&ProjectQuery {
                search: Some("acme".to_string()),
                ..Default::default()
            })
            .await
            .expect("search");
        let ids: Vec<i64> = found.iter().map(|project| project.id).collect();
        assert_eq!(ids, vec![late.id, early.id]);
    }

    #[tokio::test]
    async fn reminders_report_overdue_and_can_be_sent() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Remind").await;
        let past = app
            .add_reminder(ReminderInput {
                project_id: project.id,
                reminder_date: date(2024, 5, 20),
                message: None,
            })
            .await
            .expect("past reminder");
        app.add_reminder(ReminderInput {
            project_id: project.id,
            reminder_date: date(2024, 6, 20),
            message: Some("Later".to_string()),
        })
        .await
        .expect("future reminder");

        let reminders = app.list_reminders().await.expect("list");
        let overdue: Vec<bool> = reminders.iter().map(|detail| detail.overdue).collect();
        assert_eq!(overdue, vec![true, false]);
        assert_eq!(reminders[0].project_name, "Remind");

        let sent = app.mark_reminder_sent(past.id).await.expect("sent");
        assert!(sent.is_sent);
        let reminders = app.list_reminders().await.expect("list");
        assert!(reminders.iter().all(|detail| !detail.overdue));
    }

    #[tokio::test]
    async fn dashboard_counts_and_upcoming_window() {
        let (_dir, app) = setup_app().await;
        let mut overdue = project_input("Late", ProjectStatus::InProgress);
        overdue.deadline = date(2024, 5, 15);
        app.add_project(overdue).await.expect("overdue");
        let mut soon = project_input("Soon", ProjectStatus::NotStarted);
        soon.deadline = date(2024, 6, 8);
        let soon = app.add_project(soon).await.expect("soon");
        let mut done = project_input("Done", ProjectStatus::Completed);
        done.deadline = date(2024, 6, 3);
        app.add_project(done).await.expect("done");
        create_project(&app, "Later").await;

        let dashboard = app.dashboard().await.expect("dashboard");
        assert_eq!(dashboard.total_projects, 4);
        assert_eq!(dashboard.active_projects, 1);
        assert_eq!(dashboard.completed_projects, 1);
        assert_eq!(dashboard.overdue_projects, 1);
        let upcoming: Vec<i64> = dashboard
            .upcoming_deadlines
            .iter()
            .map(|project| project.id)
            .collect();
        assert_eq!(upcoming, vec![soon.id]);
    }

    #[tokio::test]
    async fn report_and_export_reflect_completed_projects() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Shipped").await;
        let task = add_task(&app, project.id, "Ship", TaskStatus::Todo).await;
        app.set_task_status(task.id, TaskStatus::Done)
            .await
            .expect("done");
        create_project(&app, "Pending").await;

        let summary = app.report().await.expect("report");
        assert_eq!(summary.total_projects, 2);
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.on_time_count, 1);
        assert_eq!(summary.avg_duration, 31.0);
        assert_eq!(summary.trend.labels.last().map(String::as_str), Some("Jun 2024"));
        assert_eq!(summary.trend.values.last(), Some(&1));

        let rows = app.export_rows().await.expect("export");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Shipped");
        assert_eq!(rows[0].client, "N/A");
        assert_eq!(rows[0].completed_at, "2024-06-01 12:00");
        assert_eq!(rows[0].progress, "100.0%");
    }

    #[tokio::test]
    async fn concurrent_task_edits_do_not_lose_updates() {
        let (_dir, app) = setup_app().await;
        let project = create_project(&app, "Race").await;
        let first = add_task(&app, project.id, "A", TaskStatus::Todo).await;
        let second = add_task(&app, project.id, "B", TaskStatus::Todo).await;

        let (left, right) = tokio::join!(
            app.set_task_status(first.id, TaskStatus::Done),
            app.set_task_status(second.id, TaskStatus::Done),
        );
        left.expect("left");
        right.expect("right");

        let current = app.get_project(project.id).await.expect("get project");
        assert_eq!(current.progress, 100.0);
        assert_eq!(current.status, ProjectStatus::Completed.as_str());
        assert_completion_invariant(&current);
    }
}
