use chrono::{DateTime, NaiveDate, Utc};

use crate::app::{Dashboard, ProjectDetail, ReminderDetail};
use crate::entities::{project, task};
use crate::model::{ProjectStatus, TaskStatus};
use crate::report::{format_progress, ReportSummary, Series};

fn has_text(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_project_line(project: &project::Model, overdue: bool) -> String {
    let mut line = format!(
        "- [{}] {} (project id {}, progress {}, deadline {})",
        project.status,
        project.name,
        project.id,
        format_progress(project.progress),
        format_date(project.deadline)
    );
    if overdue {
        line.push_str(" OVERDUE");
    }
    line
}

pub fn format_task_line(task: &task::Model) -> String {
    let mut line = format!("- [{}] {} (task id {})", task.status, task.title, task.id);
    if let Some(due) = task.due_date {
        line.push_str(&format!(", due {}", format_date(due)));
    }
    line
}

pub fn format_project_detail(detail: &ProjectDetail, overdue: bool) -> String {
    let project = &detail.project;
    let mut output = String::new();
    output.push_str(&format!("Project ID: {}\n", project.id));
    output.push_str(&format!("Name: {}\n", project.name));
    if has_text(&project.client) {
        output.push_str(&format!(
            "Client: {}\n",
            project.client.as_deref().unwrap_or("")
        ));
    }
    output.push_str(&format!("Status: {}\n", project.status));
    output.push_str(&format!("Progress: {}\n", format_progress(project.progress)));
    output.push_str(&format!("Start: {}\n", format_date(project.start_date)));
    output.push_str(&format!("Deadline: {}\n", format_date(project.deadline)));
    if overdue {
        output.push_str("Overdue: yes\n");
    }
    if let Some(completed_at) = project.completed_at {
        output.push_str(&format!("Completed: {}\n", format_datetime(completed_at)));
    }
    if has_text(&project.description) {
        output.push_str(&format!(
            "Description: {}\n",
            project.description.as_deref().unwrap_or("")
        ));
    }
    output.push_str(&format!("Created: {}\n", format_datetime(project.created_at)));
    output.push_str(&format!("Updated: {}\n", format_datetime(project.updated_at)));
    output.push('\n');

    if detail.tasks.is_empty() {
        output.push_str("Tasks: (none)\n");
    } else {
        let done = detail
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Done.as_str())
            .count();
        output.push_str(&format!("Tasks ({done}/{} done):\n", detail.tasks.len()));
        for task in &detail.tasks {
            output.push_str(&format_task_line(task));
            output.push('\n');
        }
    }

    if !detail.reminders.is_empty() {
        output.push_str("Reminders:\n");
        for reminder in &detail.reminders {
            let sent = if reminder.is_sent { "sent" } else { "pending" };
            output.push_str(&format!(
                "- {} [{}] {} (reminder id {})\n",
                format_date(reminder.reminder_date),
                sent,
                reminder.message.as_deref().unwrap_or(""),
                reminder.id
            ));
        }
    }
    output.trim_end().to_string()
}

pub fn format_reminder_line(detail: &ReminderDetail) -> String {
    let reminder = &detail.reminder;
    let state = if reminder.is_sent {
        "sent"
    } else if detail.overdue {
        "overdue"
    } else {
        "pending"
    };
    let mut line = format!(
        "- {} [{}] {} (reminder id {}, project id {})",
        format_date(reminder.reminder_date),
        state,
        detail.project_name,
        reminder.id,
        reminder.project_id
    );
    if has_text(&reminder.message) {
        line.push_str(&format!(": {}", reminder.message.as_deref().unwrap_or("")));
    }
    line
}

pub fn format_dashboard(dashboard: &Dashboard) -> String {
    let mut output = String::new();
    output.push_str(&format!("Total projects: {}\n", dashboard.total_projects));
    output.push_str(&format!("Active projects: {}\n", dashboard.active_projects));
    output.push_str(&format!("Completed projects: {}\n", dashboard.completed_projects));
    output.push_str(&format!("Overdue projects: {}\n", dashboard.overdue_projects));
    if dashboard.upcoming_deadlines.is_empty() {
        output.push_str("Upcoming deadlines: (none)");
        return output;
    }
    output.push_str("Upcoming deadlines:\n");
    for project in &dashboard.upcoming_deadlines {
        output.push_str(&format_project_line(project, false));
        output.push('\n');
    }
    output.trim_end().to_string()
}

fn format_series(title: &str, series: &Series, display: impl Fn(&str) -> String) -> String {
    if series.labels.is_empty() {
        return format!("{title}: (none)\n");
    }
    let mut output = format!("{title}:\n");
    for (label, value) in series.labels.iter().zip(&series.values) {
        output.push_str(&format!("- {}: {value}\n", display(label)));
    }
    output
}

fn status_label(code: &str) -> String {
    code.parse::<ProjectStatus>()
        .map(|status| status.label().to_string())
        .unwrap_or_else(|_| code.to_string())
}

pub fn format_report(summary: &ReportSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!("Total projects: {}\n", summary.total_projects));
    output.push_str(&format!("Completed: {}\n", summary.completed_count));
    output.push_str(&format!("On time: {}\n", summary.on_time_count));
    output.push_str(&format!("Overdue: {}\n", summary.overdue_count));
    output.push_str(&format!("Average duration: {:.1} days\n", summary.avg_duration));
    output.push('\n');
    output.push_str(&format_series("Status distribution", &summary.status, status_label));
    output.push_str(&format_series("Completions by month", &summary.trend, str::to_string));
    output.push('\n');
    if summary.recent_completed.is_empty() {
        output.push_str("Recently completed: (none)");
        return output;
    }
    output.push_str("Recently completed:\n");
    for recent in &summary.recent_completed {
        let completed = recent
            .completed_at
            .map(format_datetime)
            .unwrap_or_else(|| "N/A".to_string());
        let timing = match recent.on_time {
            Some(true) => "on time",
            Some(false) => "late",
            None => "unknown",
        };
        output.push_str(&format!(
            "- {} (project id {}, completed {}, {})\n",
            recent.name, recent.id, completed, timing
        ));
    }
    output.trim_end().to_string()
}
