//! Aggregate completion reports over one owner's projects.
//!
//! Everything here is a pure function of the project rows and `today`; missing
//! timestamps drop a project from the statistic that needs them and never fail.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::entities::project;
use crate::error::AppError;
use crate::model::ProjectStatus;

pub const EXPORT_FILE_NAME: &str = "completed_projects_report.csv";
pub const EXPORT_HEADER: [&str; 7] = [
    "Project Name",
    "Client",
    "Start Date",
    "Deadline",
    "Completed At",
    "Status",
    "Progress",
];
pub const MISSING_PLACEHOLDER: &str = "N/A";
pub const TREND_MONTHS: usize = 6;
pub const RECENT_LIMIT: usize = 10;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CompletionPerformance {
    pub total_completed: u64,
    pub on_time: u64,
    pub overdue: u64,
    pub average_duration_days: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Series {
    pub labels: Vec<String>,
    pub values: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrendBucket {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecentCompletion {
    pub id: i64,
    pub name: String,
    pub client: Option<String>,
    pub deadline: NaiveDate,
    pub completed_at: Option<DateTime<Utc>>,
    pub on_time: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_projects: u64,
    pub completed_count: u64,
    pub on_time_count: u64,
    pub overdue_count: u64,
    pub avg_duration: f64,
    pub recent_completed: Vec<RecentCompletion>,
    pub status: Series,
    pub trend: Series,
    pub performance: [u64; 2],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRow {
    pub name: String,
    pub client: String,
    pub start_date: String,
    pub deadline: String,
    pub completed_at: String,
    pub status: String,
    pub progress: String,
}

impl ExportRow {
    fn fields(&self) -> [&str; 7] {
        [
            self.name.as_str(),
            self.client.as_str(),
            self.start_date.as_str(),
            self.deadline.as_str(),
            self.completed_at.as_str(),
            self.status.as_str(),
            self.progress.as_str(),
        ]
    }
}

fn is_completed(project: &project::Model) -> bool {
    project.status == ProjectStatus::Completed.as_str()
}

pub fn completion_performance(projects: &[project::Model]) -> CompletionPerformance {
    let mut performance = CompletionPerformance::default();
    let mut durations = Vec::new();

    for project in projects.iter().filter(|project| is_completed(project)) {
        performance.total_completed += 1;
        let Some(completed_at) = project.completed_at else {
            continue;
        };
        let completed_on = completed_at.date_naive();
        if completed_on <= project.deadline {
            performance.on_time += 1;
        } else {
            performance.overdue += 1;
        }
        durations.push((completed_on - project.start_date).num_days());
    }

    if !durations.is_empty() {
        let total: i64 = durations.iter().sum();
        performance.average_duration_days = total as f64 / durations.len() as f64;
    }
    performance
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Project counts per status, in declaration order, skipping absent statuses.
pub fn status_distribution(projects: &[project::Model]) -> Series {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for project in projects {
        *counts.entry(project.status.as_str()).or_default() += 1;
    }

    let mut series = Series::default();
    for status in ProjectStatus::ALL {
        if let Some(count) = counts.remove(status.as_str()) {
            series.labels.push(status.as_str().to_string());
            series.values.push(count);
        }
    }
    // Unrecognised codes still count toward the total, so keep them visible.
    let mut rest: Vec<_> = counts.into_iter().collect();
    rest.sort();
    for (label, count) in rest {
        series.labels.push(label.to_string());
        series.values.push(count);
    }
    series
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// The six trend windows ending at `today`'s month, oldest first.
///
/// Each start is the first of the month reached by stepping back `30 * i` days
/// from the first of the current month, so a window can land one month off
/// around short months.
pub fn trend_buckets(today: NaiveDate) -> Vec<TrendBucket> {
    let anchor = first_of_month(today);
    (0..TREND_MONTHS as i64)
        .rev()
        .map(|i| {
            let start = first_of_month(anchor - Duration::days(30 * i));
            let end = first_of_month(start + Duration::days(32));
            TrendBucket {
                label: start.format("%b %Y").to_string(),
                start,
                end,
            }
        })
        .collect()
}

pub fn monthly_completion_trend(projects: &[project::Model], today: NaiveDate) -> Series {
    let completions: Vec<DateTime<Utc>> = projects
        .iter()
        .filter(|project| is_completed(project))
        .filter_map(|project| project.completed_at)
        .collect();

    let mut series = Series::default();
    for bucket in trend_buckets(today) {
        let start = bucket.start.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = bucket.end.and_time(chrono::NaiveTime::MIN).and_utc();
        let count = completions
            .iter()
            .filter(|completed_at| **completed_at >= start && **completed_at < end)
            .count();
        series.labels.push(bucket.label);
        series.values.push(count as u64);
    }
    series
}

fn newest_completion_first(a: &project::Model, b: &project::Model) -> Ordering {
    match (a.completed_at, b.completed_at) {
        (Some(a_at), Some(b_at)) => b_at.cmp(&a_at),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.id.cmp(&a.id))
}

fn completed_newest_first(projects: &[project::Model]) -> Vec<&project::Model> {
    let mut completed: Vec<&project::Model> =
        projects.iter().filter(|project| is_completed(project)).collect();
    completed.sort_by(|a, b| newest_completion_first(a, b));
    completed
}

pub fn recent_completed(projects: &[project::Model], limit: usize) -> Vec<RecentCompletion> {
    completed_newest_first(projects)
        .into_iter()
        .take(limit)
        .map(|project| RecentCompletion {
            id: project.id,
            name: project.name.clone(),
            client: project.client.clone(),
            deadline: project.deadline,
            completed_at: project.completed_at,
            on_time: project
                .completed_at
                .map(|completed_at| completed_at.date_naive() <= project.deadline),
        })
        .collect()
}

pub fn build_report(projects: &[project::Model], today: NaiveDate) -> ReportSummary {
    let performance = completion_performance(projects);
    ReportSummary {
        total_projects: projects.len() as u64,
        completed_count: performance.total_completed,
        on_time_count: performance.on_time,
        overdue_count: performance.overdue,
        avg_duration: round_one_decimal(performance.average_duration_days),
        recent_completed: recent_completed(projects, RECENT_LIMIT),
        status: status_distribution(projects),
        trend: monthly_completion_trend(projects, today),
        performance: [performance.on_time, performance.overdue],
    }
}

/// Renders a progress value the way it is shown everywhere else: the float
/// followed by `%`, keeping a trailing `.0` on whole numbers.
pub fn format_progress(progress: f64) -> String {
    if progress.is_finite() && progress.fract() == 0.0 {
        format!("{progress:.1}%")
    } else {
        format!("{progress}%")
    }
}

pub fn export_rows(projects: &[project::Model]) -> Vec<ExportRow> {
    completed_newest_first(projects)
        .into_iter()
        .map(|project| ExportRow {
            name: project.name.clone(),
            client: project
                .client
                .clone()
                .filter(|client| !client.is_empty())
                .unwrap_or_else(|| MISSING_PLACEHOLDER.to_string()),
            start_date: project.start_date.format("%Y-%m-%d").to_string(),
            deadline: project.deadline.format("%Y-%m-%d").to_string(),
            completed_at: project
                .completed_at
                .map(|completed_at| completed_at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| MISSING_PLACEHOLDER.to_string()),
            status: project.status.clone(),
            progress: format_progress(project.progress),
        })
        .collect()
}

/// Writes the header and one record per row; returns the number of data rows.
pub fn write_csv<W: Write>(writer: W, rows: &[ExportRow]) -> Result<usize, AppError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(EXPORT_HEADER)?;
    for row in rows {
        csv_writer.write_record(row.fields())?;
    }
    csv_writer.flush()?;
    Ok(rows.len())
}
