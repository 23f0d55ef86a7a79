use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Schema, Statement};
use url::Url;

use crate::entities::{project, reminder, task};
use crate::error::AppError;

pub fn resolve_data_dir(home: &Path) -> PathBuf {
    home.join(".projtrack")
}

pub fn resolve_db_path(home: &Path) -> PathBuf {
    resolve_data_dir(home).join("projtrack.db")
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Advisory lock file next to the database; hold it for a whole invocation.
pub fn open_lock(path: &Path) -> Result<fd_lock::RwLock<File>, AppError> {
    let lock_path = path.with_extension("lock");
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;
    Ok(fd_lock::RwLock::new(file))
}

pub async fn connect(path: &Path) -> Result<DatabaseConnection, AppError> {
    let mut url = Url::from_file_path(path)
        .map_err(|_| AppError::InvalidInput(format!("invalid sqlite path: {}", path.display())))?;
    url.set_query(Some("mode=rwc"));
    let sqlite_url = url.as_str().replacen("file://", "sqlite://", 1);
    tracing::debug!(url = %sqlite_url, "connecting to database");
    Ok(Database::connect(&sqlite_url).await?)
}

pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), AppError> {
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA foreign_keys = ON;",
    ))
    .await?;

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut project_stmt = schema.create_table_from_entity(project::Entity);
    project_stmt.if_not_exists();
    db.execute(builder.build(&project_stmt)).await?;

    let mut task_stmt = schema.create_table_from_entity(task::Entity);
    task_stmt.if_not_exists();
    db.execute(builder.build(&task_stmt)).await?;

    let mut reminder_stmt = schema.create_table_from_entity(reminder::Entity);
    reminder_stmt.if_not_exists();
    db.execute(builder.build(&reminder_stmt)).await?;

    let mut owner_index = Index::create()
        .name("idx_projects_owner_status")
        .table(project::Entity)
        .col(project::Column::Owner)
        .col(project::Column::Status)
        .to_owned();
    owner_index.if_not_exists();
    db.execute(builder.build(&owner_index)).await?;

    let mut task_index = Index::create()
        .name("idx_tasks_project_status")
        .table(task::Entity)
        .col(task::Column::ProjectId)
        .col(task::Column::Status)
        .to_owned();
    task_index.if_not_exists();
    db.execute(builder.build(&task_index)).await?;

    let mut reminder_index = Index::create()
        .name("idx_reminders_project")
        .table(reminder::Entity)
        .col(reminder::Column::ProjectId)
        .to_owned();
    reminder_index.if_not_exists();
    db.execute(builder.build(&reminder_index)).await?;

    Ok(())
}
