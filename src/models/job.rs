//! Job records parsed from scheduler output, and the patterns that select them.

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::state::StatusClass;

/// One data row of scheduler status output.
///
/// Timestamps are wall-clock times as printed by the scheduler; `None` means
/// the column held a placeholder (`-`, `-----`) or a date that could not be
/// parsed with any configured format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_name: String,
    pub last_start: Option<NaiveDateTime>,
    pub last_end: Option<NaiveDateTime>,
    /// Native status code, kept verbatim even when unrecognized
    pub raw_status: String,
    /// Run/Ntry column, e.g. `12345/1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Pri/Xit column when it holds an exit code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl JobRecord {
    /// Status class for this record's raw code.
    #[must_use]
    pub fn status(&self) -> StatusClass {
        StatusClass::from_status_code(&self.raw_status)
    }

    /// A record with no start time never ran (or its start was unreadable).
    #[must_use]
    pub fn is_unscheduled(&self) -> bool {
        self.last_start.is_none()
    }
}

/// A job-name pattern with the group it reports under.
///
/// Written on the command line as `PATTERN` or `GROUP=PATTERN`; without an
/// explicit group the pattern text itself is the group.
#[derive(Debug, Clone)]
pub struct JobPattern {
    pub group: String,
    pub pattern: String,
    matcher: Regex,
}

impl JobPattern {
    pub fn new(group: impl Into<String>, pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        Ok(Self {
            group: group.into(),
            matcher: wildcard_regex(&pattern)?,
            pattern,
        })
    }

    /// Check a job name against this pattern.
    ///
    /// `%` and `*` match any run of characters (including none); everything
    /// else matches literally, case-sensitively, as the scheduler does.
    #[must_use]
    pub fn matches(&self, job_name: &str) -> bool {
        self.matcher.is_match(job_name)
    }
}

impl PartialEq for JobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.group == other.group && self.pattern == other.pattern
    }
}

impl Eq for JobPattern {}

impl std::hash::Hash for JobPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.group.hash(state);
        self.pattern.hash(state);
    }
}

/// Anchored regex for a scheduler wildcard: `%`/`*` become `.*`, the rest is literal.
fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split(['%', '*'])
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
}

impl std::str::FromStr for JobPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (group, pattern) = match s.split_once('=') {
            Some((group, pattern)) => (group.trim(), pattern.trim()),
            None => (s, s),
        };

        if pattern.is_empty() {
            return Err(format!("empty job pattern in '{}'", s));
        }
        if group.is_empty() {
            return Err(format!("empty group name in '{}'", s));
        }
        if pattern.chars().any(char::is_whitespace) {
            return Err(format!("job pattern '{}' contains whitespace", pattern));
        }

        Self::new(group, pattern)
            .map_err(|e| format!("job pattern '{}' is not usable: {}", pattern, e))
    }
}

impl std::fmt::Display for JobPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group == self.pattern {
            f.write_str(&self.pattern)
        } else {
            write!(f, "{}={}", self.group, self.pattern)
        }
    }
}
