//! Parsing of scheduler status listings into [`JobRecord`]s.
//!
//! The listing is a loosely aligned text table:
//!
//! ```text
//! Job Name          Last Start           Last End             ST  Run/Ntry Pri/Xit
//! ----------------- -------------------- -------------------- --  -------- -------
//! FIN_LOAD_01       06/14/2024 10:00:00  06/14/2024 10:05:00  SU  12345/1  0
//! FIN_LOAD_02       -----                -----                OI  0/0
//! ```
//!
//! Rows are matched structurally: a job name, two timestamp columns that may
//! hold a dash placeholder, and an alphabetic status token. Which trailing
//! columns are expected is decided by the most recent header line, so the
//! same parser handles output with or without `Run/Ntry` and `Pri/Xit`.
//!
//! The parser never fails. Lines it cannot use are counted in the
//! [`ParseReport`].

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::models::JobRecord;

/// Timestamp formats tried in order when none are configured.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Name, start and end columns followed by the status token. Timestamps
/// start with a digit or are a run of dashes.
const ROW_PREFIX: &str = concat!(
    r"^\s*(?P<name>\S+)",
    r"\s+(?P<start>-+|\d\S*(?:\s+\d{1,2}:\d{2}(?::\d{2})?)?)",
    r"\s+(?P<end>-+|\d\S*(?:\s+\d{1,2}:\d{2}(?::\d{2})?)?)",
    r"\s+(?P<status>[A-Za-z][A-Za-z_]*)",
);
const RUN_COLUMN: &str = r"(?:\s+(?P<run>\S+))?";
const EXIT_COLUMN: &str = r"(?:\s+(?P<exit>\S+))?";
const ROW_SUFFIX: &str = r"\s*$";

/// Row patterns indexed by [`ColumnLayout::index`].
static ROW_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    let build = |run: bool, exit: bool| {
        let mut pattern = String::from(ROW_PREFIX);
        if run {
            pattern.push_str(RUN_COLUMN);
        }
        if exit {
            pattern.push_str(EXIT_COLUMN);
        }
        pattern.push_str(ROW_SUFFIX);
        Regex::new(&pattern).expect("row pattern is valid")
    };
    [
        build(false, false),
        build(true, false),
        build(false, true),
        build(true, true),
    ]
});

/// Which optional trailing columns the current table has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnLayout {
    run: bool,
    exit: bool,
}

impl ColumnLayout {
    /// Layout used before any header is seen: accept both optional columns.
    const LENIENT: ColumnLayout = ColumnLayout {
        run: true,
        exit: true,
    };

    /// Detect a header line and the columns it announces.
    fn from_header(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        let is_header = trimmed
            .get(..8)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("job name"));
        if !is_header {
            return None;
        }

        let lower = trimmed.to_ascii_lowercase();
        Some(Self {
            run: lower.contains("run"),
            exit: lower.contains("xit") || lower.contains("exit"),
        })
    }

    fn index(self) -> usize {
        usize::from(self.run) | (usize::from(self.exit) << 1)
    }

    fn pattern(self) -> &'static Regex {
        &ROW_PATTERNS[self.index()]
    }
}

/// Result of one parse pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    /// One record per distinct job name, in first-seen order
    pub records: Vec<JobRecord>,
    /// Lines that looked like data but did not match the row structure
    pub dropped: usize,
    /// Rows kept with a timestamp that no date format could read
    pub degraded: usize,
    /// Header, separator and blank lines
    pub skipped: usize,
}

impl ParseReport {
    /// True when some input could not be used as-is.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.dropped > 0 || self.degraded > 0
    }

    /// Fold in the report of another listing.
    ///
    /// Duplicate job names follow the single-pass rule: first position, last
    /// values.
    pub fn merge(&mut self, other: ParseReport) {
        let mut positions: HashMap<String, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.job_name.clone(), idx))
            .collect();

        for record in other.records {
            match positions.get(&record.job_name) {
                Some(&idx) => self.records[idx] = record,
                None => {
                    positions.insert(record.job_name.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }

        self.dropped += other.dropped;
        self.degraded += other.degraded;
        self.skipped += other.skipped;
    }
}

/// Scheduler output parser with a configurable list of date formats.
#[derive(Debug, Clone)]
pub struct OutputParser {
    date_formats: Vec<String>,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect())
    }
}

/// Outcome of reading one timestamp column.
enum Timestamp {
    Placeholder,
    Parsed(NaiveDateTime),
    Unreadable,
}

impl OutputParser {
    pub fn new(date_formats: Vec<String>) -> Self {
        Self { date_formats }
    }

    /// Parse a whole listing.
    pub fn parse_str(&self, text: &str) -> ParseReport {
        self.parse_lines(text.lines())
    }

    /// Parse a sequence of lines.
    ///
    /// Duplicate job names keep their first position and take the values of
    /// their last occurrence.
    pub fn parse_lines<I, S>(&self, lines: I) -> ParseReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = ParseReport::default();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut layout = ColumnLayout::LENIENT;

        for (line_no, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();

            if is_separator(line) {
                report.skipped += 1;
                continue;
            }
            if let Some(header) = ColumnLayout::from_header(line) {
                layout = header;
                report.skipped += 1;
                continue;
            }

            let Some(caps) = layout.pattern().captures(line) else {
                tracing::debug!(line = line_no + 1, text = %line.trim(), "Dropping unrecognized line");
                report.dropped += 1;
                continue;
            };

            let (record, degraded) = self.record_from_captures(&caps);
            if degraded {
                tracing::debug!(
                    line = line_no + 1,
                    job_name = %record.job_name,
                    "Unreadable timestamp, keeping row without it"
                );
                report.degraded += 1;
            }

            match positions.get(&record.job_name) {
                Some(&idx) => report.records[idx] = record,
                None => {
                    positions.insert(record.job_name.clone(), report.records.len());
                    report.records.push(record);
                }
            }
        }

        if report.is_degraded() {
            tracing::warn!(
                dropped = report.dropped,
                degraded = report.degraded,
                records = report.records.len(),
                "Scheduler output parsed with problems"
            );
        }

        report
    }

    fn record_from_captures(&self, caps: &Captures<'_>) -> (JobRecord, bool) {
        let mut degraded = false;
        let mut timestamp = |name: &str| match caps.name(name).map(|m| self.read_timestamp(m.as_str())) {
            Some(Timestamp::Parsed(ts)) => Some(ts),
            Some(Timestamp::Unreadable) => {
                degraded = true;
                None
            }
            Some(Timestamp::Placeholder) | None => None,
        };

        let last_start = timestamp("start");
        let last_end = timestamp("end");

        let record = JobRecord {
            job_name: caps["name"].to_string(),
            last_start,
            last_end,
            raw_status: caps["status"].to_string(),
            run: caps
                .name("run")
                .map(|m| m.as_str())
                .filter(|s| !is_placeholder(s))
                .map(str::to_string),
            exit_code: caps.name("exit").and_then(|m| m.as_str().parse().ok()),
        };

        (record, degraded)
    }

    fn read_timestamp(&self, text: &str) -> Timestamp {
        if is_placeholder(text) {
            return Timestamp::Placeholder;
        }
        // Collapse column padding between date and time
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        self.date_formats
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&normalized, fmt).ok())
            .map_or(Timestamp::Unreadable, Timestamp::Parsed)
    }
}

/// Blank lines and rules made of dashes, underscores or equals signs.
fn is_separator(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_whitespace() || matches!(c, '-' | '_' | '='))
}

fn is_placeholder(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    const SCENARIO: &str = "\
Job Name   Last Start           Last End             ST
----------------------------------------------------------
JOB_A      2024-06-14 10:00:00  2024-06-14 10:05:00  SU
JOB_B      -                    -                    FA
JOB_C      2023-01-01 00:00:00  2023-01-01 00:10:00  OI
";

    #[test]
    fn test_parse_scenario() {
        let report = OutputParser::default().parse_str(SCENARIO);

        assert_eq!(report.records.len(), 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.degraded, 0);

        let a = &report.records[0];
        assert_eq!(a.job_name, "JOB_A");
        assert_eq!(a.last_start, Some(at("2024-06-14 10:00:00")));
        assert_eq!(a.last_end, Some(at("2024-06-14 10:05:00")));
        assert_eq!(a.raw_status, "SU");

        let b = &report.records[1];
        assert_eq!(b.job_name, "JOB_B");
        assert_eq!(b.last_start, None);
        assert_eq!(b.last_end, None);
        assert_eq!(b.raw_status, "FA");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let parser = OutputParser::default();
        assert_eq!(parser.parse_str(SCENARIO), parser.parse_str(SCENARIO));
    }

    #[test]
    fn test_separator_block_yields_no_records() {
        let text = "---------\n---------\n   \n___ ___\nJOB_X  -  -  SU\n";
        let report = OutputParser::default().parse_str(text);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped, 4);
    }

    #[test]
    fn test_autorep_layout_with_run_and_exit() {
        let text = "\
Job Name                                                         Last Start           Last End             ST  Run/Ntry Pri/Xit
________________________________________________________________ ____________________ ____________________ __  ________ _______
FIN_LOAD_01                                                      06/14/2024 10:00:00  06/14/2024 10:05:00  SU  12345/1  0
FIN_LOAD_02                                                      06/14/2024 11:00:00  06/14/2024 11:01:00  FA  12346/2  1
FIN_LOAD_03                                                      -----                -----                OI  0/0
";
        let report = OutputParser::default().parse_str(text);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.dropped, 0);

        let first = &report.records[0];
        assert_eq!(first.last_start, Some(at("2024-06-14 10:00:00")));
        assert_eq!(first.run.as_deref(), Some("12345/1"));
        assert_eq!(first.exit_code, Some(0));

        assert_eq!(report.records[1].exit_code, Some(1));

        let iced = &report.records[2];
        assert_eq!(iced.last_start, None);
        assert_eq!(iced.raw_status, "OI");
        assert_eq!(iced.run.as_deref(), Some("0/0"));
        assert_eq!(iced.exit_code, None);
    }

    #[test]
    fn test_header_controls_trailing_columns() {
        // Without Run/Xit in the header, trailing tokens make the row unusable
        let text = "Job Name  Last Start  Last End  ST\nJOB_A  -  -  SU  extra\n";
        let report = OutputParser::default().parse_str(text);
        assert_eq!(report.records.len(), 0);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn test_unparseable_date_is_degraded_not_dropped() {
        let text = "JOB_D  13/45/2024 99:99:99  -  SU\n";
        let report = OutputParser::default().parse_str(text);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.degraded, 1);
        assert_eq!(report.records[0].last_start, None);
        assert_eq!(report.records[0].raw_status, "SU");
    }

    #[test]
    fn test_short_lines_are_dropped() {
        let text = "JOB_E SU\nJOB_F\nrandom noise here\n";
        let report = OutputParser::default().parse_str(text);
        assert!(report.records.is_empty());
        assert_eq!(report.dropped, 3);
    }

    #[test]
    fn test_duplicates_last_occurrence_wins() {
        let text = "\
JOB_A  2024-06-01 00:00:00  -  FA
JOB_B  -  -  OH
JOB_A  2024-06-14 10:00:00  -  SU
";
        let report = OutputParser::default().parse_str(text);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].job_name, "JOB_A");
        assert_eq!(report.records[0].raw_status, "SU");
        assert_eq!(report.records[0].last_start, Some(at("2024-06-14 10:00:00")));
        assert_eq!(report.records[1].job_name, "JOB_B");
    }

    #[test]
    fn test_custom_date_formats() {
        let parser = OutputParser::new(vec!["%d.%m.%Y %H:%M".to_string()]);
        let report = parser.parse_str("JOB_G  14.06.2024 10:00  -  SU\n");
        assert_eq!(report.records[0].last_start, Some(at("2024-06-14 10:00:00")));
        assert_eq!(report.degraded, 0);
    }

    #[test]
    fn test_single_token_timestamps() {
        let report = OutputParser::default()
            .parse_str("JOB_H  2024-06-14T10:00:00  2024-06-14T10:05:00  SUCCESS\n");
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].last_start, Some(at("2024-06-14 10:00:00")));
        assert_eq!(report.records[0].raw_status, "SUCCESS");
    }

    #[test]
    fn test_multiple_tables_concatenated() {
        let text = format!("{}\n{}", SCENARIO, SCENARIO.replace("JOB_", "OTHER_"));
        let report = OutputParser::default().parse_str(&text);
        assert_eq!(report.records.len(), 6);
        assert_eq!(report.skipped, 5);
    }

    #[test]
    fn test_merge_keeps_first_position_last_values() {
        let parser = OutputParser::default();
        let mut report = parser.parse_str("JOB_A  -  -  IN\nJOB_B  -  -  SU\n");
        report.merge(parser.parse_str("JOB_C  -  -  FA\nJOB_A  -  -  RU\nnoise\n"));

        let names: Vec<&str> = report.records.iter().map(|r| r.job_name.as_str()).collect();
        assert_eq!(names, ["JOB_A", "JOB_B", "JOB_C"]);
        assert_eq!(report.records[0].raw_status, "RU");
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn test_empty_input() {
        let report = OutputParser::default().parse_str("");
        assert_eq!(report, ParseReport::default());
        assert!(!report.is_degraded());
    }
}
