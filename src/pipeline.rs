//! One end-to-end run: fetch, parse, classify, aggregate, publish.
//!
//! Failures of single patterns or single batches degrade the run instead of
//! aborting it. The [`RunOutcome`] tells full success, partial success and
//! total failure apart, and maps to the process exit code.

use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{Aggregation, Aggregator, ClassifiedJob, status_ages};
use crate::error::RunnerError;
use crate::models::{JobPattern, JobRecord};
use crate::parser::{OutputParser, ParseReport};
use crate::publish::{MetricsSink, PublishReport, Publisher, WINDOW_LABEL};
use crate::scheduler::SchedulerClient;

/// Exit code for a run where some patterns or batches failed and the caller
/// asked for partial success to be reported as an error.
pub const EXIT_PARTIAL: i32 = 3;

/// Exit code for a run that published nothing.
pub const EXIT_TOTAL_FAILURE: i32 = 1;

/// What to run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub patterns: Vec<JobPattern>,
    /// Earlier run to report (`-r -N`)
    pub history: Option<u32>,
    /// One command for all patterns instead of one per pattern
    pub combine: bool,
    pub now: NaiveDateTime,
    /// Also publish per-job status ages
    pub publish_ages: bool,
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every pattern and every batch succeeded
    FullSuccess,
    /// Something failed but at least one window batch was published
    PartialSuccess,
    /// No usable output or no window batch published
    TotalFailure,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    ///
    /// Partial success exits 0 unless `fail_on_partial` is set.
    #[must_use]
    pub fn exit_code(&self, fail_on_partial: bool) -> i32 {
        match self {
            Self::FullSuccess => 0,
            Self::PartialSuccess if fail_on_partial => EXIT_PARTIAL,
            Self::PartialSuccess => 0,
            Self::TotalFailure => EXIT_TOTAL_FAILURE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullSuccess => "full success",
            Self::PartialSuccess => "partial success",
            Self::TotalFailure => "total failure",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pattern whose command produced no usable output.
#[derive(Debug)]
pub struct PatternFailure {
    pub pattern: String,
    pub error: RunnerError,
}

/// Parse statistics without the records themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub records: usize,
    pub dropped: usize,
    pub degraded: usize,
}

impl From<&ParseReport> for ParseSummary {
    fn from(report: &ParseReport) -> Self {
        Self {
            records: report.records.len(),
            dropped: report.dropped,
            degraded: report.degraded,
        }
    }
}

/// Classified jobs gathered from the scheduler.
#[derive(Debug, Default)]
pub struct Collection {
    pub jobs: Vec<ClassifiedJob>,
    pub parse: ParseSummary,
    /// Pattern arguments that ran successfully
    pub succeeded: Vec<String>,
    pub failed: Vec<PatternFailure>,
}

impl Collection {
    /// True when at least one command produced output.
    #[must_use]
    pub fn has_output(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

/// Everything a run did.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub collection: Collection,
    pub aggregation: Option<Aggregation>,
    pub publish: PublishReport,
}

/// Attribute and classify parsed records.
pub fn classify_records(records: Vec<JobRecord>, patterns: &[JobPattern]) -> Vec<ClassifiedJob> {
    records
        .into_iter()
        .map(|record| ClassifiedJob::attribute(record, patterns))
        .collect()
}

/// Run the scheduler command for every pattern and parse the merged output.
///
/// A command that exits successfully without a single job row counts as a
/// failed pattern: an empty table is never a valid answer.
pub async fn collect(
    client: &SchedulerClient,
    parser: &OutputParser,
    plan: &RunPlan,
    cancel: &CancellationToken,
) -> Collection {
    let outcomes = client
        .fetch_all(&plan.patterns, plan.history, plan.combine, cancel)
        .await;

    let mut report = ParseReport::default();
    let mut collection = Collection::default();
    for outcome in outcomes {
        let parsed = outcome.result.and_then(|output| {
            tracing::debug!(pattern = %outcome.pattern, lines = output.len(), "Fetched scheduler output");
            let parsed = parser.parse_lines(&output);
            if parsed.records.is_empty() {
                return Err(RunnerError::NoUsableOutput {
                    pattern: outcome.pattern.clone(),
                    dropped: parsed.dropped,
                });
            }
            Ok(parsed)
        });

        match parsed {
            Ok(parsed) => {
                report.merge(parsed);
                collection.succeeded.push(outcome.pattern);
            }
            Err(error) => {
                tracing::warn!(pattern = %outcome.pattern, error = %error, "Pattern failed");
                collection.failed.push(PatternFailure {
                    pattern: outcome.pattern,
                    error,
                });
            }
        }
    }

    collection.parse = ParseSummary::from(&report);
    collection.jobs = classify_records(report.records, &plan.patterns);
    collection
}

/// Aggregate a collection and publish it.
///
/// Nothing is published when no pattern produced output, so a scheduler
/// outage does not overwrite the last good values with zeros. The run counts
/// as published only when a window batch reached the sink; the unscheduled
/// and age batches alone do not.
pub async fn publish_collection<S: MetricsSink>(
    collection: Collection,
    aggregator: &Aggregator,
    publisher: &Publisher<S>,
    plan: &RunPlan,
) -> RunReport {
    if !collection.has_output() {
        tracing::error!(
            failed = collection.failed.len(),
            "No pattern produced usable output, nothing published"
        );
        return RunReport {
            outcome: RunOutcome::TotalFailure,
            collection,
            aggregation: None,
            publish: PublishReport::default(),
        };
    }

    let aggregation = aggregator.aggregate(&collection.jobs, plan.now);
    let window_labels: Vec<&str> = aggregator
        .windows()
        .iter()
        .map(|w| w.label.as_str())
        .collect();

    let mut batches = publisher.count_batches(&aggregation, &window_labels);
    if plan.publish_ages {
        batches.push(publisher.age_batch(&status_ages(&collection.jobs, plan.now)));
    }

    let publish = publisher.publish_all(&batches).await;

    let windows_published = publish
        .outcomes
        .iter()
        .filter(|o| o.result.is_ok())
        .filter(|o| {
            o.key
                .label(WINDOW_LABEL)
                .is_some_and(|w| window_labels.contains(&w))
        })
        .count();

    let outcome = if windows_published == 0 {
        RunOutcome::TotalFailure
    } else if !collection.failed.is_empty() || !publish.is_complete() {
        RunOutcome::PartialSuccess
    } else {
        RunOutcome::FullSuccess
    };

    RunReport {
        outcome,
        collection,
        aggregation: Some(aggregation),
        publish,
    }
}

/// Fetch, parse, aggregate and publish.
pub async fn run<S: MetricsSink>(
    client: &SchedulerClient,
    parser: &OutputParser,
    aggregator: &Aggregator,
    publisher: &Publisher<S>,
    plan: &RunPlan,
    cancel: &CancellationToken,
) -> RunReport {
    let collection = collect(client, parser, plan, cancel).await;
    let report = publish_collection(collection, aggregator, publisher, plan).await;

    let failed_batches: Vec<String> = report.publish.failed().map(|o| o.key.to_string()).collect();
    tracing::info!(
        outcome = %report.outcome,
        patterns_ok = report.collection.succeeded.len(),
        patterns_failed = report.collection.failed.len(),
        records = report.collection.parse.records,
        dropped_lines = report.collection.parse.dropped,
        batches_published = report.publish.published(),
        failed_batches = ?failed_batches,
        "Run finished"
    );

    report
}

/// Cancel `token` once `deadline` has passed.
pub fn cancel_after(token: CancellationToken, deadline: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(deadline_secs = deadline.as_secs_f64(), "Deadline reached, cancelling in-flight commands");
                token.cancel();
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::aggregate::Dimension;
    use crate::error::PublishError;
    use crate::models::{EnvironmentConfig, WindowMode, WindowSet};
    use crate::publish::{GroupingKey, MemorySink, PublishedMetric};
    use crate::scheduler::Environment;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;

    const SCRIPT: &str = r#"#!/bin/sh
case "$2" in
  JOB_%|JOB_%,*)
    cat <<'EOF'
Job Name   Last Start           Last End             ST
----------------------------------------------------------
JOB_A      2024-06-14 10:00:00  2024-06-14 10:05:00  SU
JOB_B      -                    -                    FA
JOB_C      2023-01-01 00:00:00  2023-01-01 00:10:00  OI
EOF
    ;;
  SLOW%) sleep 10 ;;
  EMPTY%) exit 0 ;;
  GARBAGE%) echo "CAUAJM_E_50097 No such job: $2" ;;
  *) echo "CAUAJM_E_50097 No such job: $2" >&2; exit 1 ;;
esac
"#;

    fn fake_client(dir: &Path) -> SchedulerClient {
        let program = dir.join("autorep");
        std::fs::write(&program, SCRIPT).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        let env = Arc::new(Environment::new("test", &EnvironmentConfig::default(), None));
        SchedulerClient::new(program, env, Duration::from_secs(5)).with_max_concurrency(4)
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn plan(patterns: &[&str]) -> RunPlan {
        RunPlan {
            patterns: patterns.iter().map(|p| p.parse().unwrap()).collect(),
            history: None,
            combine: false,
            now: at("2024-06-15 00:00:00"),
            publish_ages: false,
        }
    }

    fn aggregator() -> Aggregator {
        aggregator_with(&["last_7_days=7d", "last_1_year=365d"])
    }

    fn aggregator_with(windows: &[&str]) -> Aggregator {
        let windows = WindowSet::parse(windows).unwrap();
        Aggregator::new(windows, &[Dimension::Status], WindowMode::Cumulative)
    }

    fn window_keys(sink: &MemorySink) -> Vec<String> {
        sink.snapshot()
            .into_keys()
            .filter_map(|k| k.label("window").map(str::to_string))
            .collect()
    }

    fn value_of(metrics: &[PublishedMetric], status: &str) -> Option<f64> {
        metrics
            .iter()
            .find(|m| m.labels.get("status").is_some_and(|s| s == status))
            .map(|m| m.value)
    }

    /// Sink that rejects everything.
    struct DownSink;

    impl MetricsSink for DownSink {
        fn describe(&self) -> String {
            "down".to_string()
        }

        async fn groups(&self, _job: &str) -> Result<Vec<GroupingKey>, PublishError> {
            Err(PublishError::PublishFailed {
                url: "http://down".to_string(),
                attempts: 1,
                reason: "connection refused".to_string(),
            })
        }

        async fn clear(&self, _key: &GroupingKey) -> Result<(), PublishError> {
            Err(PublishError::PublishFailed {
                url: "http://down".to_string(),
                attempts: 1,
                reason: "connection refused".to_string(),
            })
        }

        async fn push(&self, _key: &GroupingKey, _metrics: &[PublishedMetric]) -> Result<(), PublishError> {
            Ok(())
        }
    }

    /// Sink that only accepts the unscheduled and age groups.
    struct WindowRejectingSink(MemorySink);

    impl WindowRejectingSink {
        fn check(key: &GroupingKey) -> Result<(), PublishError> {
            match key.label("window") {
                Some("unscheduled") | Some("current") => Ok(()),
                _ => Err(PublishError::Rejected {
                    url: format!("http://gw/{}", key),
                    status: 400,
                    body: "bad request".to_string(),
                }),
            }
        }
    }

    impl MetricsSink for WindowRejectingSink {
        fn describe(&self) -> String {
            "window-rejecting".to_string()
        }

        async fn groups(&self, job: &str) -> Result<Vec<GroupingKey>, PublishError> {
            self.0.groups(job).await
        }

        async fn clear(&self, key: &GroupingKey) -> Result<(), PublishError> {
            Self::check(key)?;
            self.0.clear(key).await
        }

        async fn push(&self, key: &GroupingKey, metrics: &[PublishedMetric]) -> Result<(), PublishError> {
            Self::check(key)?;
            self.0.push(key, metrics).await
        }
    }

    async fn run_with<S: MetricsSink>(
        client: &SchedulerClient,
        aggregator: &Aggregator,
        publisher: &Publisher<S>,
        plan: &RunPlan,
    ) -> RunReport {
        run(
            client,
            &OutputParser::default(),
            aggregator,
            publisher,
            plan,
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let plan = plan(&["JOB_%"]);

        let report = run(
            &client,
            &OutputParser::default(),
            &aggregator(),
            &publisher,
            &plan,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.outcome, RunOutcome::FullSuccess);
        assert_eq!(report.outcome.exit_code(true), 0);
        assert_eq!(report.collection.parse.records, 3);
        assert!(report.collection.jobs.iter().all(|j| j.group == "JOB_%"));

        let aggregation = report.aggregation.unwrap();
        assert_eq!(aggregation.count_for(&[("status", "success")], "last_7_days"), Some(1));
        assert_eq!(aggregation.count_for(&[("status", "success")], "last_1_year"), Some(1));
        assert_eq!(aggregation.count_for(&[("status", "on_ice")], "last_7_days"), Some(0));
        assert_eq!(aggregation.unscheduled_total, 1);

        let sink = publisher.sink();
        let week = sink.current(&GroupingKey::new("autosys_jobs").with_label("window", "last_7_days"));
        assert_eq!(value_of(&week, "success"), Some(1.0));
        assert_eq!(value_of(&week, "on_ice"), Some(0.0));

        let unscheduled =
            sink.current(&GroupingKey::new("autosys_jobs").with_label("window", "unscheduled"));
        assert_eq!(unscheduled.len(), 1);
        assert_eq!(unscheduled[0].metric_name, "autosys_unscheduled_jobs");
        assert_eq!(value_of(&unscheduled, "failure"), Some(1.0));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_on_sink() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let plan = plan(&["JOB_%"]);
        let parser = OutputParser::default();
        let cancel = CancellationToken::new();

        run(&client, &parser, &aggregator(), &publisher, &plan, &cancel).await;
        let first = publisher.sink().snapshot();
        run(&client, &parser, &aggregator(), &publisher, &plan, &cancel).await;
        assert_eq!(publisher.sink().snapshot(), first);
    }

    #[tokio::test]
    async fn test_partial_success_when_one_pattern_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let plan = plan(&["JOB_%", "MISSING%"]);

        let report = run(
            &client,
            &OutputParser::default(),
            &aggregator(),
            &publisher,
            &plan,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.outcome, RunOutcome::PartialSuccess);
        assert_eq!(report.outcome.exit_code(false), 0);
        assert_eq!(report.outcome.exit_code(true), EXIT_PARTIAL);
        assert_eq!(report.collection.failed.len(), 1);
        assert_eq!(report.collection.failed[0].pattern, "MISSING%");
        assert!(matches!(
            report.collection.failed[0].error,
            RunnerError::CommandFailed { .. }
        ));
        assert_eq!(report.publish.published(), 3);
    }

    #[tokio::test]
    async fn test_total_failure_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let plan = plan(&["MISSING%", "ALSO_MISSING%"]);

        let report = run(
            &client,
            &OutputParser::default(),
            &aggregator(),
            &publisher,
            &plan,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.outcome, RunOutcome::TotalFailure);
        assert_eq!(report.outcome.exit_code(false), EXIT_TOTAL_FAILURE);
        assert!(report.aggregation.is_none());
        assert!(publisher.sink().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_when_sink_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(DownSink, "autosys_jobs", "autosys");

        let report = run(
            &client,
            &OutputParser::default(),
            &aggregator(),
            &publisher,
            &plan(&["JOB_%"]),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.outcome, RunOutcome::TotalFailure);
        assert_eq!(report.publish.failed().count(), 3);
    }

    #[tokio::test]
    async fn test_deadline_publishes_partial_results() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let plan = plan(&["JOB_%", "SLOW%"]);
        let cancel = CancellationToken::new();
        let _deadline = cancel_after(cancel.clone(), Duration::from_millis(500));

        let started = std::time::Instant::now();
        let report = run(
            &client,
            &OutputParser::default(),
            &aggregator(),
            &publisher,
            &plan,
            &cancel,
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.outcome, RunOutcome::PartialSuccess);
        assert!(matches!(
            report.collection.failed[0].error,
            RunnerError::Cancelled { .. }
        ));
        let week = publisher
            .sink()
            .current(&GroupingKey::new("autosys_jobs").with_label("window", "last_7_days"));
        assert_eq!(value_of(&week, "success"), Some(1.0));
    }

    #[tokio::test]
    async fn test_combined_invocation_attributes_groups() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let mut plan = plan(&["ab=JOB_%", "other=ZZZ%"]);
        plan.combine = true;

        let collection = collect(&client, &OutputParser::default(), &plan, &CancellationToken::new()).await;
        assert_eq!(collection.succeeded, vec!["JOB_%,ZZZ%"]);
        assert_eq!(collection.jobs.len(), 3);
        assert!(collection.jobs.iter().all(|j| j.group == "ab"));
    }

    #[tokio::test]
    async fn test_ages_batch_published_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let mut plan = plan(&["JOB_%"]);
        plan.publish_ages = true;

        let report = run(
            &client,
            &OutputParser::default(),
            &aggregator(),
            &publisher,
            &plan,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(report.publish.published(), 4);

        let ages = publisher
            .sink()
            .current(&GroupingKey::new("autosys_jobs").with_label("window", "current"));
        // JOB_B never started and has no age
        assert_eq!(ages.len(), 2);
        assert_eq!(value_of(&ages, "success"), Some(14.0 * 3600.0));
    }

    #[tokio::test]
    async fn test_successful_command_without_rows_is_a_failed_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        run_with(&client, &aggregator(), &publisher, &plan(&["JOB_%"])).await;
        let last_good = publisher.sink().snapshot();

        for (pattern, dropped) in [("EMPTY%", 0), ("GARBAGE%", 1)] {
            let report = run_with(&client, &aggregator(), &publisher, &plan(&[pattern])).await;

            assert_eq!(report.outcome, RunOutcome::TotalFailure, "{}", pattern);
            assert_eq!(report.outcome.exit_code(false), EXIT_TOTAL_FAILURE);
            assert!(report.collection.succeeded.is_empty());
            match &report.collection.failed[0].error {
                RunnerError::NoUsableOutput { pattern: p, dropped: d } => {
                    assert_eq!(p, pattern);
                    assert_eq!(*d, dropped);
                }
                other => panic!("expected NoUsableOutput, got {:?}", other),
            }
            assert_eq!(publisher.sink().snapshot(), last_good, "{}", pattern);
        }
    }

    #[tokio::test]
    async fn test_empty_pattern_beside_good_one_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");

        let report = run_with(&client, &aggregator(), &publisher, &plan(&["JOB_%", "EMPTY%"])).await;
        assert_eq!(report.outcome, RunOutcome::PartialSuccess);
        assert_eq!(report.collection.succeeded, vec!["JOB_%"]);
        assert_eq!(report.collection.parse.records, 3);
    }

    #[tokio::test]
    async fn test_removed_window_group_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let plan = plan(&["JOB_%"]);

        run_with(&client, &aggregator_with(&["a=7d", "b=30d"]), &publisher, &plan).await;
        assert_eq!(window_keys(publisher.sink()), ["a", "b", "unscheduled"]);

        let report = run_with(&client, &aggregator_with(&["a=7d"]), &publisher, &plan).await;
        assert_eq!(report.outcome, RunOutcome::FullSuccess);
        assert_eq!(window_keys(publisher.sink()), ["a", "unscheduled"]);
        assert_eq!(report.publish.removed.len(), 1);
    }

    #[tokio::test]
    async fn test_age_group_cleared_when_ages_turned_off() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(MemorySink::new(), "autosys_jobs", "autosys");
        let mut plan = plan(&["JOB_%"]);

        plan.publish_ages = true;
        run_with(&client, &aggregator(), &publisher, &plan).await;
        assert!(window_keys(publisher.sink()).contains(&"current".to_string()));

        plan.publish_ages = false;
        run_with(&client, &aggregator(), &publisher, &plan).await;
        assert_eq!(
            window_keys(publisher.sink()),
            ["last_1_year", "last_7_days", "unscheduled"]
        );
    }

    #[tokio::test]
    async fn test_total_failure_when_only_unscheduled_batch_lands() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path());
        let publisher = Publisher::new(WindowRejectingSink(MemorySink::new()), "autosys_jobs", "autosys");
        let mut plan = plan(&["JOB_%"]);
        plan.publish_ages = true;

        let report = run_with(&client, &aggregator(), &publisher, &plan).await;

        assert_eq!(report.publish.published(), 2);
        assert_eq!(report.outcome, RunOutcome::TotalFailure);
        assert_eq!(report.outcome.exit_code(false), EXIT_TOTAL_FAILURE);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::FullSuccess.exit_code(true), 0);
        assert_eq!(RunOutcome::PartialSuccess.exit_code(false), 0);
        assert_eq!(RunOutcome::PartialSuccess.exit_code(true), 3);
        assert_eq!(RunOutcome::TotalFailure.exit_code(false), 1);
    }
}
