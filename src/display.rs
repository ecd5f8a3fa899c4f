//! Display and formatting functions for job status and run results

use chrono::NaiveDateTime;
use owo_colors::OwoColorize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, Width, object::Rows},
};

use crate::aggregate::{Aggregation, ClassifiedJob, status_ages};
use crate::formatting::{
    format_age, format_labels, format_timestamp, layout, truncate_string,
};
use crate::models::{Config, StatusClass};
use crate::pipeline::{Collection, RunOutcome, RunReport};

/// Color a status label by class
pub fn format_status(status: StatusClass) -> String {
    let label = status.as_str();
    match status {
        StatusClass::Success => label.green().to_string(),
        StatusClass::Failure => label.bright_red().to_string(),
        StatusClass::Terminated => label.red().to_string(),
        StatusClass::OnIce => label.cyan().to_string(),
        StatusClass::OnHold => label.yellow().to_string(),
        StatusClass::Unknown => label.bright_black().to_string(),
    }
}

fn style_table(table: &mut Table) -> String {
    table
        .with(Style::rounded())
        .with(Width::wrap(layout::TABLE_WIDTH).keep_words(true))
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "Job Name")]
    name: String,

    #[tabled(rename = "Group")]
    group: String,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "ST")]
    raw: String,

    #[tabled(rename = "Last Start")]
    last_start: String,

    #[tabled(rename = "Last End")]
    last_end: String,

    #[tabled(rename = "Age")]
    age: String,

    #[tabled(rename = "Exit")]
    exit: String,
}

/// Table of classified jobs with their age relative to `now`
pub fn format_jobs(jobs: &[ClassifiedJob], now: NaiveDateTime) -> String {
    if jobs.is_empty() {
        return "No jobs found".yellow().to_string();
    }

    let ages = status_ages(jobs, now);
    let rows: Vec<JobRow> = jobs
        .iter()
        .zip(ages)
        .map(|(job, age)| JobRow {
            name: truncate_string(&job.record.job_name, layout::JOB_NAME_LEN),
            group: job.group.clone(),
            status: format_status(job.status),
            raw: job.record.raw_status.clone(),
            last_start: format_timestamp(job.record.last_start),
            last_end: format_timestamp(job.record.last_end),
            age: format_age(age.age_secs),
            exit: job
                .record
                .exit_code
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
        })
        .collect();

    style_table(&mut Table::new(rows))
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Labels")]
    labels: String,

    #[tabled(rename = "Window")]
    window: String,

    #[tabled(rename = "Count")]
    count: String,
}

/// Table of window counts followed by the unscheduled counts
pub fn format_aggregation(aggregation: &Aggregation) -> String {
    if aggregation.counts.is_empty() && aggregation.unscheduled.is_empty() {
        return "No jobs found".yellow().to_string();
    }

    let rows: Vec<CountRow> = aggregation
        .counts
        .iter()
        .map(|c| CountRow {
            labels: truncate_string(&format_labels(&c.labels), layout::LABELS_LEN),
            window: c.window.clone(),
            count: if c.count == 0 {
                c.count.bright_black().to_string()
            } else {
                c.count.to_string()
            },
        })
        .collect();

    let mut output = style_table(&mut Table::new(rows));

    if aggregation.unscheduled_total > 0 {
        let rows: Vec<CountRow> = aggregation
            .unscheduled
            .iter()
            .map(|c| CountRow {
                labels: truncate_string(&format_labels(&c.labels), layout::LABELS_LEN),
                window: "unscheduled".to_string(),
                count: c.count.yellow().to_string(),
            })
            .collect();
        output.push('\n');
        output.push_str(&format!(
            "{} {}\n",
            "Unscheduled (no readable start time):".yellow(),
            aggregation.unscheduled_total
        ));
        output.push_str(&style_table(&mut Table::new(rows)));
    }

    output
}

/// One-line parse summary
pub fn format_parse_summary(collection: &Collection) -> String {
    let parse = &collection.parse;
    let mut line = format!("{} jobs parsed", parse.records);
    if parse.dropped > 0 {
        line.push_str(&format!(", {}", format!("{} lines dropped", parse.dropped).yellow()));
    }
    if parse.degraded > 0 {
        line.push_str(&format!(
            ", {}",
            format!("{} rows with unreadable timestamps", parse.degraded).yellow()
        ));
    }
    line
}

/// Summary of a push run: outcome, failed patterns and failed batches
pub fn format_run_summary(report: &RunReport) -> String {
    let outcome = match report.outcome {
        RunOutcome::FullSuccess => report.outcome.as_str().green().bold().to_string(),
        RunOutcome::PartialSuccess => report.outcome.as_str().yellow().bold().to_string(),
        RunOutcome::TotalFailure => report.outcome.as_str().bright_red().bold().to_string(),
    };

    let mut lines = vec![
        format!("Outcome: {}", outcome),
        format!(
            "Patterns: {} ok, {} failed",
            report.collection.succeeded.len(),
            report.collection.failed.len()
        ),
        format!("Parse: {}", format_parse_summary(&report.collection)),
        format!(
            "Batches: {} published, {} failed",
            report.publish.published(),
            report.publish.failed().count()
        ),
    ];
    if !report.publish.removed.is_empty() {
        let removed: Vec<String> = report.publish.removed.iter().map(ToString::to_string).collect();
        lines.push(format!("Removed stale groups: {}", removed.join(", ")));
    }

    for failure in &report.collection.failed {
        lines.push(format!("  {} {}", "✗".bright_red(), failure.error));
    }
    for batch in report.publish.failed() {
        if let Err(e) = &batch.result {
            lines.push(format!("  {} {}: {}", "✗".bright_red(), batch.key, e));
        }
    }

    lines.join("\n")
}

#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Instance")]
    instance: String,

    #[tabled(rename = "Server")]
    server: String,

    #[tabled(rename = "Pushgateway")]
    pushgateway: String,
}

/// Table of configured environments
pub fn format_environments(config: &Config) -> String {
    let dash = || "-".to_string();
    let rows: Vec<EnvironmentRow> = config
        .environments
        .iter()
        .map(|(name, env)| EnvironmentRow {
            name: name.clone(),
            instance: env.instance.clone().unwrap_or_else(dash),
            server: env.server.clone().unwrap_or_else(dash),
            pushgateway: env
                .pushgateway_url
                .clone()
                .or_else(|| {
                    config
                        .publish
                        .pushgateway_url
                        .as_ref()
                        .map(|url| format!("{} (default)", url))
                })
                .unwrap_or_else(dash),
        })
        .collect();

    style_table(&mut Table::new(rows))
}
