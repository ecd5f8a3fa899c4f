//! Rolling-window aggregation of classified job records.
//!
//! Counts are keyed by the chosen [`Dimension`] values plus the window label.
//! Every dimension tuple that occurs in the input gets an entry for every
//! window, zero included, so a series that drops to zero is published as zero
//! instead of disappearing. Records without a start time never enter a window;
//! they are counted separately as unscheduled.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::{JobPattern, JobRecord, StatusClass, WindowMode, WindowSet};

/// Group assigned to records no pattern matches.
pub const UNMATCHED_GROUP: &str = "unmatched";

/// Attribute used as a label when counting.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Group of the pattern that selected the job
    Group,
    /// Status class
    Status,
    /// Job name
    #[value(name = "job_name")]
    JobName,
    /// Month of the last start, e.g. `Jun-2024`
    Month,
}

impl Dimension {
    /// Metric label name.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Status => "status",
            Self::JobName => "job_name",
            Self::Month => "month",
        }
    }

    /// Label value for a job, `None` for a month without a start time.
    fn value_for(&self, job: &ClassifiedJob) -> Option<String> {
        match self {
            Self::Group => Some(job.group.clone()),
            Self::Status => Some(job.status.as_str().to_string()),
            Self::JobName => Some(job.record.job_name.clone()),
            Self::Month => job
                .record
                .last_start
                .map(|start| start.format("%b-%Y").to_string()),
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A parsed record with its status class and reporting group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedJob {
    pub record: JobRecord,
    pub status: StatusClass,
    pub group: String,
}

impl ClassifiedJob {
    pub fn new(record: JobRecord, group: impl Into<String>) -> Self {
        let status = record.status();
        Self {
            record,
            status,
            group: group.into(),
        }
    }

    /// Classify a record and attribute it to the first pattern matching its
    /// name, or to [`UNMATCHED_GROUP`].
    pub fn attribute(record: JobRecord, patterns: &[JobPattern]) -> Self {
        let group = patterns
            .iter()
            .find(|p| p.matches(&record.job_name))
            .map_or(UNMATCHED_GROUP, |p| p.group.as_str())
            .to_string();
        Self::new(record, group)
    }
}

/// Count of jobs for one dimension tuple in one window.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AggregateCount {
    /// Dimension label name to value
    pub labels: BTreeMap<String, String>,
    pub window: String,
    pub count: u64,
}

/// Count of jobs without a start time for one dimension tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UnscheduledCount {
    pub labels: BTreeMap<String, String>,
    pub count: u64,
}

/// Status of one job together with how long ago it last started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusAge {
    pub job_name: String,
    pub group: String,
    pub status: StatusClass,
    /// Seconds since the last start; `None` when the job never started
    pub age_secs: Option<i64>,
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Aggregation {
    pub dimensions: Vec<Dimension>,
    /// Sorted by labels, then by window in configured order
    pub counts: Vec<AggregateCount>,
    /// Unscheduled records keyed by the dimensions other than month
    pub unscheduled: Vec<UnscheduledCount>,
    pub unscheduled_total: u64,
    /// Records ignored because they were malformed
    pub skipped: usize,
}

impl Aggregation {
    /// Look up a count by label values (in any order) and window.
    #[must_use]
    pub fn count_for(&self, labels: &[(&str, &str)], window: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|c| c.window == window && labels_equal(&c.labels, labels))
            .map(|c| c.count)
    }

    /// Counts for one window.
    pub fn for_window<'a>(&'a self, window: &'a str) -> impl Iterator<Item = &'a AggregateCount> {
        self.counts.iter().filter(move |c| c.window == window)
    }
}

fn labels_equal(map: &BTreeMap<String, String>, labels: &[(&str, &str)]) -> bool {
    map.len() == labels.len()
        && labels
            .iter()
            .all(|(k, v)| map.get(*k).is_some_and(|actual| actual == v))
}

/// Buckets classified jobs into windows.
#[derive(Debug, Clone)]
pub struct Aggregator {
    windows: WindowSet,
    dimensions: Vec<Dimension>,
    mode: WindowMode,
}

impl Aggregator {
    /// Duplicate dimensions are ignored, first position kept.
    pub fn new(windows: WindowSet, dimensions: &[Dimension], mode: WindowMode) -> Self {
        let mut seen = BTreeSet::new();
        let dimensions = dimensions
            .iter()
            .copied()
            .filter(|d| seen.insert(*d))
            .collect();
        Self {
            windows,
            dimensions,
            mode,
        }
    }

    pub fn windows(&self) -> &WindowSet {
        &self.windows
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Count jobs per dimension tuple and window relative to `now`.
    ///
    /// Pure: the same jobs and `now` always give the same result.
    #[must_use]
    pub fn aggregate(&self, jobs: &[ClassifiedJob], now: NaiveDateTime) -> Aggregation {
        let window_count = self.windows.len();
        let has_month = self.dimensions.contains(&Dimension::Month);

        // Key: dimension values in dimension order; value: count per window index
        let mut windowed: BTreeMap<Vec<String>, Vec<u64>> = BTreeMap::new();
        let mut unscheduled: BTreeMap<Vec<String>, u64> = BTreeMap::new();
        let mut unscheduled_total = 0;
        let mut skipped = 0;

        for job in jobs {
            if job.record.job_name.is_empty() {
                tracing::debug!(status = %job.status, "Skipping record without a job name");
                skipped += 1;
                continue;
            }

            let Some(start) = job.record.last_start else {
                unscheduled_total += 1;
                *unscheduled.entry(self.unscheduled_key(job)).or_default() += 1;
                if !has_month {
                    // Keep the tuple visible in every window with a zero count
                    windowed
                        .entry(self.key(job))
                        .or_insert_with(|| vec![0; window_count]);
                }
                continue;
            };

            let slots = windowed
                .entry(self.key(job))
                .or_insert_with(|| vec![0; window_count]);
            for window in self.windows.memberships(start, now, self.mode) {
                if let Some(idx) = self.windows.iter().position(|w| w.label == window.label) {
                    slots[idx] += 1;
                }
            }
        }

        let counts = windowed
            .into_iter()
            .flat_map(|(values, slots)| {
                let labels = self.labels(&self.dimensions, &values);
                self.windows
                    .iter()
                    .zip(slots)
                    .map(move |(window, count)| AggregateCount {
                        labels: labels.clone(),
                        window: window.label.clone(),
                        count,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let unscheduled_dims = self.unscheduled_dimensions();
        let unscheduled = unscheduled
            .into_iter()
            .map(|(values, count)| UnscheduledCount {
                labels: self.labels(&unscheduled_dims, &values),
                count,
            })
            .collect();

        Aggregation {
            dimensions: self.dimensions.clone(),
            counts,
            unscheduled,
            unscheduled_total,
            skipped,
        }
    }

    fn key(&self, job: &ClassifiedJob) -> Vec<String> {
        self.dimensions
            .iter()
            .map(|d| d.value_for(job).unwrap_or_default())
            .collect()
    }

    fn unscheduled_dimensions(&self) -> Vec<Dimension> {
        self.dimensions
            .iter()
            .copied()
            .filter(|d| *d != Dimension::Month)
            .collect()
    }

    fn unscheduled_key(&self, job: &ClassifiedJob) -> Vec<String> {
        self.unscheduled_dimensions()
            .iter()
            .map(|d| d.value_for(job).unwrap_or_default())
            .collect()
    }

    fn labels(&self, dimensions: &[Dimension], values: &[String]) -> BTreeMap<String, String> {
        dimensions
            .iter()
            .zip(values)
            .map(|(d, v)| (d.label().to_string(), v.clone()))
            .collect()
    }
}

/// `(status, age)` per job relative to `now`, in input order.
///
/// No threshold is applied; deciding when a parked job is stale is up to the
/// consumer.
#[must_use]
pub fn status_ages(jobs: &[ClassifiedJob], now: NaiveDateTime) -> Vec<StatusAge> {
    jobs.iter()
        .map(|job| StatusAge {
            job_name: job.record.job_name.clone(),
            group: job.group.clone(),
            status: job.status,
            age_secs: job
                .record
                .last_start
                .map(|start| now.signed_duration_since(start).num_seconds()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn job(name: &str, start: Option<&str>, status: &str, group: &str) -> ClassifiedJob {
        ClassifiedJob::new(
            JobRecord {
                job_name: name.to_string(),
                last_start: start.map(at),
                last_end: None,
                raw_status: status.to_string(),
                run: None,
                exit_code: None,
            },
            group,
        )
    }

    fn scenario_jobs() -> Vec<ClassifiedJob> {
        vec![
            job("JOB_A", Some("2024-06-14 10:00:00"), "SU", "g"),
            job("JOB_B", None, "FA", "g"),
            job("JOB_C", Some("2023-01-01 00:00:00"), "OI", "g"),
        ]
    }

    fn aggregator(dims: &[Dimension]) -> Aggregator {
        let windows = WindowSet::parse(&["last_7_days=7d", "last_1_year=365d"]).unwrap();
        Aggregator::new(windows, dims, WindowMode::Cumulative)
    }

    #[test]
    fn test_scenario_counts_by_status() {
        let now = at("2024-06-15 00:00:00");
        let agg = aggregator(&[Dimension::Status]).aggregate(&scenario_jobs(), now);

        let count = |status: &str, window: &str| agg.count_for(&[("status", status)], window);
        assert_eq!(count("success", "last_7_days"), Some(1));
        assert_eq!(count("success", "last_1_year"), Some(1));
        assert_eq!(count("on_ice", "last_7_days"), Some(0));
        // JOB_C started 531 days before now, outside a 365 day window
        assert_eq!(count("on_ice", "last_1_year"), Some(0));

        assert_eq!(agg.unscheduled_total, 1);
        assert_eq!(agg.unscheduled.len(), 1);
        assert_eq!(agg.unscheduled[0].labels["status"], "failure");
        assert_eq!(agg.unscheduled[0].count, 1);

        // JOB_B is visible with zero counts, never inside a window
        assert_eq!(count("failure", "last_7_days"), Some(0));
        assert_eq!(count("failure", "last_1_year"), Some(0));
        let windowed_total: u64 = agg.counts.iter().map(|c| c.count).sum();
        assert_eq!(windowed_total, 2);
    }

    #[test]
    fn test_scenario_on_ice_in_longer_window() {
        let now = at("2024-06-15 00:00:00");
        let windows = WindowSet::parse(&["last_2_years=730d"]).unwrap();
        let agg = Aggregator::new(windows, &[Dimension::Status], WindowMode::Cumulative)
            .aggregate(&scenario_jobs(), now);
        assert_eq!(agg.count_for(&[("status", "on_ice")], "last_2_years"), Some(1));
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let now = at("2024-06-15 00:00:00");
        let agg = aggregator(&[Dimension::Group, Dimension::Status]);
        let jobs = scenario_jobs();
        assert_eq!(agg.aggregate(&jobs, now), agg.aggregate(&jobs, now));
    }

    #[test]
    fn test_counts_are_ordered_by_labels_then_window() {
        let now = at("2024-06-15 00:00:00");
        let agg = aggregator(&[Dimension::Status]).aggregate(&scenario_jobs(), now);
        let order: Vec<_> = agg
            .counts
            .iter()
            .map(|c| (c.labels["status"].as_str(), c.window.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("failure", "last_7_days"),
                ("failure", "last_1_year"),
                ("on_ice", "last_7_days"),
                ("on_ice", "last_1_year"),
                ("success", "last_7_days"),
                ("success", "last_1_year"),
            ]
        );
    }

    #[test]
    fn test_group_and_job_name_dimensions() {
        let now = at("2024-06-15 00:00:00");
        let jobs = vec![
            job("FIN_1", Some("2024-06-14 00:00:00"), "SU", "finance"),
            job("FIN_2", Some("2024-06-13 00:00:00"), "SU", "finance"),
            job("HR_1", Some("2024-06-13 00:00:00"), "FA", "hr"),
        ];

        let agg = aggregator(&[Dimension::Group, Dimension::Status]).aggregate(&jobs, now);
        assert_eq!(
            agg.count_for(&[("group", "finance"), ("status", "success")], "last_7_days"),
            Some(2)
        );
        assert_eq!(
            agg.count_for(&[("status", "failure"), ("group", "hr")], "last_1_year"),
            Some(1)
        );

        let agg = aggregator(&[Dimension::JobName]).aggregate(&jobs, now);
        assert_eq!(agg.count_for(&[("job_name", "FIN_2")], "last_7_days"), Some(1));
        assert_eq!(agg.counts.len(), 6);
    }

    #[test]
    fn test_month_dimension() {
        let now = at("2024-06-15 00:00:00");
        let jobs = vec![
            job("A", Some("2024-06-14 00:00:00"), "SU", "g"),
            job("B", Some("2024-05-02 00:00:00"), "SU", "g"),
            job("C", None, "OH", "g"),
        ];
        let agg = aggregator(&[Dimension::Month, Dimension::Status]).aggregate(&jobs, now);

        assert_eq!(
            agg.count_for(&[("month", "Jun-2024"), ("status", "success")], "last_7_days"),
            Some(1)
        );
        assert_eq!(
            agg.count_for(&[("month", "May-2024"), ("status", "success")], "last_1_year"),
            Some(1)
        );
        // Unscheduled records have no month and are keyed without it
        assert!(agg.counts.iter().all(|c| c.labels.contains_key("month")));
        assert_eq!(agg.unscheduled.len(), 1);
        assert_eq!(agg.unscheduled[0].labels.len(), 1);
        assert_eq!(agg.unscheduled[0].labels["status"], "on_hold");
    }

    #[test]
    fn test_disjoint_mode() {
        let now = at("2024-06-15 00:00:00");
        let windows = WindowSet::parse(&["last_7_days=7d", "last_1_year=365d"]).unwrap();
        let agg = Aggregator::new(windows, &[Dimension::Status], WindowMode::Disjoint)
            .aggregate(&scenario_jobs(), now);

        assert_eq!(agg.count_for(&[("status", "success")], "last_7_days"), Some(1));
        assert_eq!(agg.count_for(&[("status", "success")], "last_1_year"), Some(0));
    }

    #[test]
    fn test_no_dimensions_counts_totals() {
        let now = at("2024-06-15 00:00:00");
        let agg = aggregator(&[]).aggregate(&scenario_jobs(), now);
        assert_eq!(agg.count_for(&[], "last_7_days"), Some(1));
        assert_eq!(agg.count_for(&[], "last_1_year"), Some(1));
        assert_eq!(agg.unscheduled[0].count, 1);
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let now = at("2024-06-15 00:00:00");
        let mut jobs = scenario_jobs();
        jobs.push(job("", Some("2024-06-14 00:00:00"), "SU", "g"));
        let agg = aggregator(&[Dimension::Status]).aggregate(&jobs, now);
        assert_eq!(agg.skipped, 1);
        assert_eq!(agg.count_for(&[("status", "success")], "last_7_days"), Some(1));
    }

    #[test]
    fn test_duplicate_dimensions_collapse() {
        let agg = aggregator(&[Dimension::Status, Dimension::Status, Dimension::Group]);
        assert_eq!(agg.dimensions(), &[Dimension::Status, Dimension::Group]);
    }

    #[test]
    fn test_attribute_first_matching_pattern() {
        let patterns = vec![
            JobPattern::new("finance", "FIN_%").unwrap(),
            JobPattern::new("all", "%").unwrap(),
        ];
        let record = job("FIN_LOAD", None, "SU", "").record;
        assert_eq!(ClassifiedJob::attribute(record, &patterns).group, "finance");

        let record = job("HR_LOAD", None, "SU", "").record;
        assert_eq!(ClassifiedJob::attribute(record, &patterns).group, "all");

        let record = job("HR_LOAD", None, "SU", "").record;
        assert_eq!(
            ClassifiedJob::attribute(record, &patterns[..1]).group,
            UNMATCHED_GROUP
        );
    }

    #[test]
    fn test_status_ages() {
        let now = at("2024-06-15 00:00:00");
        let ages = status_ages(&scenario_jobs(), now);
        assert_eq!(ages.len(), 3);
        assert_eq!(ages[0].status, StatusClass::Success);
        assert_eq!(ages[0].age_secs, Some(14 * 3600));
        assert_eq!(ages[1].age_secs, None);
        assert_eq!(ages[2].status, StatusClass::OnIce);
        assert!(ages[2].age_secs.unwrap() > 365 * 86_400);
    }
}
