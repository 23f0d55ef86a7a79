mod app;
mod cli;
mod clock;
mod db;
mod entities;
mod error;
mod lifecycle;
mod logging;
mod model;
mod progress;
mod report;
mod util;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::app::{App, ProgressChanges};
use crate::cli::{
    Cli, Command, ProjectAdd, ProjectCommand, ProjectDone, ProjectList, ProjectRecompute,
    ProjectRemove, ProjectShow, ProjectStatusArg, ProjectUpdate, ReminderAdd, ReminderCommand,
    ReminderSent, ReportCommand, ReportExport, ReportShow, TaskAdd, TaskCommand, TaskDone,
    TaskList, TaskRemove, TaskStatusArg, TaskUpdate,
};
use crate::clock::{Clock, FixedClock, SystemClock};
use crate::entities::{project, task};
use crate::error::AppError;
use crate::model::{
    ProjectChanges, ProjectInput, ProjectQuery, ProjectStatus, ReminderInput, TaskChanges,
    TaskInput, TaskStatus,
};
use crate::report::format_progress;
use crate::util::{
    format_dashboard, format_date, format_project_detail, format_reminder_line, format_report,
};

const OWNER_FLAG: &str = "--owner";

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let Cli {
        db,
        owner,
        now,
        command,
    } = Cli::parse();

    let owner = resolve_owner(owner)?;
    let db_path = resolve_db_path(db)?;
    db::ensure_parent_dir(&db_path)?;
    let mut lock = db::open_lock(&db_path)?;
    let _guard = lock.write()?;

    let db = db::connect(&db_path).await?;
    db::ensure_schema(&db).await?;
    let clock: Arc<dyn Clock> = match now {
        Some(instant) => Arc::new(FixedClock(instant)),
        None => Arc::new(SystemClock),
    };
    let app = App::new(db, owner, clock);
    tracing::debug!(owner = %app.owner(), path = %db_path.display(), "session opened");

    match command {
        Command::Project(command) => handle_project(&app, command).await,
        Command::Task(command) => handle_task(&app, command).await,
        Command::Reminder(command) => handle_reminder(&app, command).await,
        Command::Dashboard => handle_dashboard(&app).await,
        Command::Report(command) => handle_report(&app, command).await,
    }
}

async fn handle_project(app: &App, command: ProjectCommand) -> Result<(), AppError> {
    match command {
        ProjectCommand::Add(args) => handle_project_add(app, args).await,
        ProjectCommand::List(args) => handle_project_list(app, args).await,
        ProjectCommand::Show(args) => handle_project_show(app, args).await,
        ProjectCommand::Update(args) => handle_project_update(app, args).await,
        ProjectCommand::Done(args) => handle_project_done(app, args).await,
        ProjectCommand::Recompute(args) => handle_project_recompute(app, args).await,
        ProjectCommand::Remove(args) => handle_project_remove(app, args).await,
    }
}

async fn handle_task(app: &App, command: TaskCommand) -> Result<(), AppError> {
    match command {
        TaskCommand::Add(args) => handle_task_add(app, args).await,
        TaskCommand::List(args) => handle_task_list(app, args).await,
        TaskCommand::Update(args) => handle_task_update(app, args).await,
        TaskCommand::Done(args) => handle_task_done(app, args).await,
        TaskCommand::Remove(args) => handle_task_remove(app, args).await,
    }
}

async fn handle_reminder(app: &App, command: ReminderCommand) -> Result<(), AppError> {
    match command {
        ReminderCommand::Add(args) => handle_reminder_add(app, args).await,
        ReminderCommand::List => handle_reminder_list(app).await,
        ReminderCommand::Sent(args) => handle_reminder_sent(app, args).await,
    }
}

async fn handle_report(app: &App, command: ReportCommand) -> Result<(), AppError> {
    match command {
        ReportCommand::Show(args) => handle_report_show(app, args).await,
        ReportCommand::Export(args) => handle_report_export(app, args).await,
    }
}

async fn handle_project_add(app: &App, args: ProjectAdd) -> Result<(), AppError> {
    let project = app
        .add_project(ProjectInput {
            name: args.name,
            client: args.client,
            description: args.description,
            start_date: args.start,
            deadline: args.deadline,
            status: project_status_from_arg(args.status),
        })
        .await?;
    println!("Created project ID: {}: {}", project.id, project.name);
    Ok(())
}

async fn handle_project_list(app: &App, args: ProjectList) -> Result<(), AppError> {
    let projects = app
        .list_projects(&ProjectQuery {
            status: args.status.map(project_status_from_arg),
            search: args.search,
        })
        .await?;
    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }
    print_project_list(app, &projects)
}

async fn handle_project_show(app: &App, args: ProjectShow) -> Result<(), AppError> {
    let detail = app.get_project_detail(args.id).await?;
    let overdue = app.is_overdue(&detail.project)?;
    println!("{}", format_project_detail(&detail, overdue));
    Ok(())
}

async fn handle_project_update(app: &App, args: ProjectUpdate) -> Result<(), AppError> {
    let changes = ProjectChanges {
        name: args.name,
        client: args.client,
        description: args.description,
        start_date: args.start,
        deadline: args.deadline,
        status: args.status.map(project_status_from_arg),
        progress: args.progress,
    };
    if changes.is_empty() {
        return Err(AppError::InvalidInput(
            "project update requires at least one field".to_string(),
        ));
    }
    let (project, updates) = app.update_project(args.id, changes).await?;
    println!("Updated project ID: {}: {}", project.id, project.name);
    print_progress_changes(&updates);
    Ok(())
}

async fn handle_project_done(app: &App, args: ProjectDone) -> Result<(), AppError> {
    let (project, _) = app
        .update_project(
            args.id,
            ProjectChanges {
                status: Some(ProjectStatus::Completed),
                ..Default::default()
            },
        )
        .await?;
    println!("Project ID: {} marked completed.", project.id);
    Ok(())
}

async fn handle_project_recompute(app: &App, args: ProjectRecompute) -> Result<(), AppError> {
    let changes = app.recompute_project(args.id).await?;
    if changes.is_empty() {
        println!("Project ID: {} already up to date.", args.id);
        return Ok(());
    }
    print_progress_changes(&changes);
    Ok(())
}

async fn handle_project_remove(app: &App, args: ProjectRemove) -> Result<(), AppError> {
    app.delete_project(args.id).await?;
    println!("Project ID: {} removed.", args.id);
    Ok(())
}

async fn handle_task_add(app: &App, args: TaskAdd) -> Result<(), AppError> {
    let (task, changes) = app
        .add_task(
            args.project_id,
            TaskInput {
                title: args.title,
                description: args.description,
                status: task_status_from_arg(args.status),
                due_date: args.due,
            },
        )
        .await?;
    println!(
        "Created task ID: {} for project ID: {}",
        task.id, task.project_id
    );
    print_progress_changes(&changes);
    Ok(())
}

async fn handle_task_list(app: &App, args: TaskList) -> Result<(), AppError> {
    let tasks = app
        .list_tasks(args.project_id, args.status.map(task_status_from_arg))
        .await?;
    if args.count {
        println!("Total: {}", tasks.len());
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks found for project ID: {}.", args.project_id);
        return Ok(());
    }
    print_task_list(&tasks);
    Ok(())
}

async fn handle_task_update(app: &App, args: TaskUpdate) -> Result<(), AppError> {
    if args.title.is_none()
        && args.description.is_none()
        && args.status.is_none()
        && args.due.is_none()
    {
        return Err(AppError::InvalidInput(
            "task update requires at least one field".to_string(),
        ));
    }
    let (task, changes) = app
        .update_task(
            args.id,
            TaskChanges {
                title: args.title,
                description: args.description,
                status: args.status.map(task_status_from_arg),
                due_date: args.due,
            },
        )
        .await?;
    println!("Updated task ID: {}.", task.id);
    print_progress_changes(&changes);
    Ok(())
}

async fn handle_task_done(app: &App, args: TaskDone) -> Result<(), AppError> {
    let (task, changes) = app.set_task_status(args.id, TaskStatus::Done).await?;
    println!("Task ID: {} marked done.", task.id);
    print_progress_changes(&changes);
    Ok(())
}

async fn handle_task_remove(app: &App, args: TaskRemove) -> Result<(), AppError> {
    if args.ids.is_empty() {
        return Err(AppError::InvalidInput("no task ids provided".to_string()));
    }
    let (deleted, changes) = app.delete_tasks(&args.ids).await?;
    if args.ids.len() == 1 {
        println!("Task ID: {} removed.", args.ids[0]);
    } else {
        println!("Removed {} tasks.", deleted);
    }
    print_progress_changes(&changes);
    Ok(())
}

async fn handle_reminder_add(app: &App, args: ReminderAdd) -> Result<(), AppError> {
    let reminder = app
        .add_reminder(ReminderInput {
            project_id: args.project_id,
            reminder_date: args.date,
            message: args.message,
        })
        .await?;
    println!(
        "Created reminder ID: {} for project ID: {}",
        reminder.id, reminder.project_id
    );
    Ok(())
}

async fn handle_reminder_list(app: &App) -> Result<(), AppError> {
    let reminders = app.list_reminders().await?;
    if reminders.is_empty() {
        println!("No reminders found.");
        return Ok(());
    }
    for detail in &reminders {
        println!("{}", format_reminder_line(detail));
    }
    Ok(())
}

async fn handle_reminder_sent(app: &App, args: ReminderSent) -> Result<(), AppError> {
    let reminder = app.mark_reminder_sent(args.id).await?;
    println!("Reminder ID: {} marked sent.", reminder.id);
    Ok(())
}

async fn handle_dashboard(app: &App) -> Result<(), AppError> {
    let dashboard = app.dashboard().await?;
    println!("{}", format_dashboard(&dashboard));
    Ok(())
}

async fn handle_report_show(app: &App, args: ReportShow) -> Result<(), AppError> {
    let summary = app.report().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", format_report(&summary));
    }
    Ok(())
}

async fn handle_report_export(app: &App, args: ReportExport) -> Result<(), AppError> {
    let rows = app.export_rows().await?;
    if args.stdout {
        let stdout = io::stdout();
        report::write_csv(stdout.lock(), &rows)?;
        return Ok(());
    }

    let path = args
        .output
        .unwrap_or_else(|| PathBuf::from(report::EXPORT_FILE_NAME));
    db::ensure_parent_dir(&path)?;
    let mut writer = BufWriter::new(File::create(&path)?);
    let written = report::write_csv(&mut writer, &rows)?;
    writer.flush()?;
    println!(
        "Exported {} completed projects to {}",
        written,
        path.display()
    );
    Ok(())
}

fn resolve_owner(owner: Option<String>) -> Result<String, AppError> {
    let value = owner.ok_or_else(|| AppError::InvalidInput(format!("{OWNER_FLAG} is required")))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput(format!("{OWNER_FLAG} is empty")));
    }
    Ok(trimmed.to_string())
}

fn resolve_db_path(db: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(path) = db {
        return Ok(path);
    }
    let home = std::env::var_os("HOME").ok_or_else(|| {
        AppError::InvalidInput("unable to resolve home directory; pass --db".to_string())
    })?;
    Ok(db::resolve_db_path(&PathBuf::from(home)))
}

fn project_status_from_arg(arg: ProjectStatusArg) -> ProjectStatus {
    match arg {
        ProjectStatusArg::NotStarted => ProjectStatus::NotStarted,
        ProjectStatusArg::InProgress => ProjectStatus::InProgress,
        ProjectStatusArg::OnHold => ProjectStatus::OnHold,
        ProjectStatusArg::Completed => ProjectStatus::Completed,
        ProjectStatusArg::Cancelled => ProjectStatus::Cancelled,
    }
}

fn task_status_from_arg(arg: TaskStatusArg) -> TaskStatus {
    match arg {
        TaskStatusArg::Todo => TaskStatus::Todo,
        TaskStatusArg::InProgress => TaskStatus::InProgress,
        TaskStatusArg::Done => TaskStatus::Done,
    }
}

fn print_progress_changes(changes: &ProgressChanges) {
    if changes.is_empty() {
        return;
    }

    println!("Auto progress updates:");
    for change in &changes.projects {
        if change.from_status == change.to_status {
            println!(
                "- Project ID: {} progress {} -> {} ({}).",
                change.project_id,
                format_progress(change.from_progress),
                format_progress(change.to_progress),
                change.reason
            );
        } else {
            println!(
                "- Project ID: {} status auto-updated from {} to {}, progress {} ({}).",
                change.project_id,
                change.from_status,
                change.to_status,
                format_progress(change.to_progress),
                change.reason
            );
        }
    }
}

fn print_project_list(app: &App, projects: &[project::Model]) -> Result<(), AppError> {
    println!(
        "{:<4} {:<12} {:<9} {:<11} {:<30} {}",
        "ID", "STATUS", "PROGRESS", "DEADLINE", "NAME", "CLIENT"
    );
    for project in projects {
        let mut deadline = format_date(project.deadline);
        if app.is_overdue(project)? {
            deadline.push('!');
        }
        println!(
            "{:<4} {:<12} {:<9} {:<11} {:<30} {}",
            project.id,
            project.status,
            format_progress(project.progress),
            deadline,
            project.name,
            project.client.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_task_list(tasks: &[task::Model]) {
    println!("{:<4} {:<12} {:<11} {}", "ID", "STATUS", "DUE", "TITLE");
    for task in tasks {
        println!(
            "{:<4} {:<12} {:<11} {}",
            task.id,
            task.status,
            task.due_date.map(format_date).unwrap_or_default(),
            task.title
        );
    }
}
