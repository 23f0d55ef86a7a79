use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "projtrack",
    version,
    about = "Track projects and tasks, and report on completions"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        env = "PROJTRACK_DB",
        help = "SQLite database path (defaults to ~/.projtrack/projtrack.db)"
    )]
    pub db: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "ID",
        env = "PROJTRACK_OWNER",
        help = "Principal that owns the projects"
    )]
    pub owner: Option<String>,
    #[arg(long, global = true, value_name = "RFC3339", hide = true)]
    pub now: Option<DateTime<Utc>>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(subcommand)]
    Project(ProjectCommand),
    #[command(subcommand)]
    Task(TaskCommand),
    #[command(subcommand)]
    Reminder(ReminderCommand),
    Dashboard,
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    Add(ProjectAdd),
    List(ProjectList),
    Show(ProjectShow),
    Update(ProjectUpdate),
    Done(ProjectDone),
    Recompute(ProjectRecompute),
    Remove(ProjectRemove),
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    Add(TaskAdd),
    List(TaskList),
    Update(TaskUpdate),
    Done(TaskDone),
    Remove(TaskRemove),
}

#[derive(Subcommand, Debug)]
pub enum ReminderCommand {
    Add(ReminderAdd),
    List,
    Sent(ReminderSent),
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    Show(ReportShow),
    Export(ReportExport),
}

#[derive(Args, Debug)]
pub struct ProjectAdd {
    pub name: String,
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub deadline: NaiveDate,
    #[arg(long)]
    pub client: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub start: Option<NaiveDate>,
    #[arg(long, value_enum, default_value = "not-started")]
    pub status: ProjectStatusArg,
}

#[derive(Args, Debug)]
pub struct ProjectList {
    #[arg(long, value_enum)]
    pub status: Option<ProjectStatusArg>,
    #[arg(long, value_name = "TERM", help = "Match name, client or description")]
    pub search: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProjectShow {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct ProjectUpdate {
    pub id: i64,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub client: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub start: Option<NaiveDate>,
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub deadline: Option<NaiveDate>,
    #[arg(long, value_enum)]
    pub status: Option<ProjectStatusArg>,
    #[arg(long, help = "Manual progress (0-100); task-derived progress wins")]
    pub progress: Option<f64>,
}

#[derive(Args, Debug)]
pub struct ProjectDone {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct ProjectRecompute {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct ProjectRemove {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct TaskAdd {
    pub project_id: i64,
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_enum, default_value = "todo")]
    pub status: TaskStatusArg,
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub due: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct TaskList {
    pub project_id: i64,
    #[arg(long, value_enum)]
    pub status: Option<TaskStatusArg>,
    #[arg(long)]
    pub count: bool,
}

#[derive(Args, Debug)]
pub struct TaskUpdate {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_enum)]
    pub status: Option<TaskStatusArg>,
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub due: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct TaskDone {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct TaskRemove {
    #[arg(value_name = "ID", num_args = 1..)]
    pub ids: Vec<i64>,
}

#[derive(Args, Debug)]
pub struct ReminderAdd {
    pub project_id: i64,
    #[arg(value_name = "YYYY-MM-DD")]
    pub date: NaiveDate,
    #[arg(long)]
    pub message: Option<String>,
}

#[derive(Args, Debug)]
pub struct ReminderSent {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct ReportShow {
    #[arg(long, help = "Print the report as JSON chart data")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ReportExport {
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with = "stdout",
        help = "Destination file (defaults to completed_projects_report.csv)"
    )]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub stdout: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ProjectStatusArg {
    NotStarted,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TaskStatusArg {
    Todo,
    InProgress,
    Done,
}
