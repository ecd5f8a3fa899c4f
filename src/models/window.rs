//! Rolling time windows used to bucket job activity.
//!
//! A window is written as `LABEL=DURATION` or just `DURATION`, where the
//! duration is an integer followed by a unit:
//!
//! | Unit | Meaning |
//! |------|---------|
//! | `h`  | hours |
//! | `d`  | days |
//! | `w`  | weeks |
//! | `mo` | months of 30 days |
//! | `y`  | years of 365 days |
//!
//! Without a label one is derived from the duration: `7d` becomes
//! `last_7_days`, `1y` becomes `last_1_year`.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// How a record is assigned when several windows contain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// A record counts in every window that contains it (windows overlap)
    #[default]
    Cumulative,
    /// A record counts only in the shortest window that contains it
    Disjoint,
}

/// A named rolling interval ending at "now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub label: String,
    pub duration: TimeDelta,
}

impl TimeWindow {
    pub fn new(label: impl Into<String>, duration: TimeDelta) -> Self {
        Self {
            label: label.into(),
            duration,
        }
    }

    /// Earliest start time inside the window.
    ///
    /// Saturates to the minimum representable time for very long windows.
    #[must_use]
    pub fn cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        now.checked_sub_signed(self.duration)
            .unwrap_or(NaiveDateTime::MIN)
    }

    /// Window membership: `start >= now - duration`.
    #[must_use]
    pub fn contains(&self, start: NaiveDateTime, now: NaiveDateTime) -> bool {
        start >= self.cutoff(now)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Error for a malformed window specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWindowError {
    pub spec: String,
    pub reason: String,
}

impl std::fmt::Display for ParseWindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid window '{}': {}", self.spec, self.reason)
    }
}

impl std::error::Error for ParseWindowError {}

impl std::str::FromStr for TimeWindow {
    type Err = ParseWindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ParseWindowError {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let (label, duration_str) = match s.split_once('=') {
            Some((label, duration)) => (Some(label.trim()), duration.trim()),
            None => (None, s.trim()),
        };

        let split_at = duration_str
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| err("missing unit (expected h, d, w, mo or y)"))?;
        let (amount_str, unit) = duration_str.split_at(split_at);

        let amount: i64 = amount_str
            .parse()
            .map_err(|_| err("duration must start with a positive integer"))?;
        if amount <= 0 {
            return Err(err("duration must be greater than zero"));
        }

        let (duration, unit_name) = match unit.trim() {
            "h" => (TimeDelta::try_hours(amount), "hour"),
            "d" => (TimeDelta::try_days(amount), "day"),
            "w" => (TimeDelta::try_weeks(amount), "week"),
            "mo" => (amount.checked_mul(30).and_then(TimeDelta::try_days), "month"),
            "y" => (amount.checked_mul(365).and_then(TimeDelta::try_days), "year"),
            _ => return Err(err("unknown unit (expected h, d, w, mo or y)")),
        };
        let duration = duration.ok_or_else(|| err("duration is too large"))?;

        let label = match label {
            Some("") => return Err(err("empty label")),
            Some(label) if !is_valid_label(label) => {
                return Err(err("label may only contain letters, digits and '_'"));
            }
            Some(label) => label.to_string(),
            None if amount == 1 => format!("last_1_{}", unit_name),
            None => format!("last_{}_{}s", amount, unit_name),
        };

        Ok(TimeWindow::new(label, duration))
    }
}

fn is_valid_label(label: &str) -> bool {
    label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// An ordered set of windows with unique labels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowSet {
    windows: Vec<TimeWindow>,
}

impl WindowSet {
    /// Build a set, rejecting duplicate labels.
    pub fn new(windows: Vec<TimeWindow>) -> Result<Self, ParseWindowError> {
        for (i, window) in windows.iter().enumerate() {
            if windows[..i].iter().any(|w| w.label == window.label) {
                return Err(ParseWindowError {
                    spec: window.label.clone(),
                    reason: "duplicate window label".to_string(),
                });
            }
        }
        Ok(Self { windows })
    }

    /// Parse a list of window specifications.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, ParseWindowError> {
        let windows = specs
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<TimeWindow>, _>>()?;
        Self::new(windows)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeWindow> {
        self.windows.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Windows a start time belongs to under the given mode.
    #[must_use]
    pub fn memberships(
        &self,
        start: NaiveDateTime,
        now: NaiveDateTime,
        mode: WindowMode,
    ) -> Vec<&TimeWindow> {
        let containing = self.windows.iter().filter(|w| w.contains(start, now));
        match mode {
            WindowMode::Cumulative => containing.collect(),
            WindowMode::Disjoint => containing.min_by_key(|w| w.duration).into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a WindowSet {
    type Item = &'a TimeWindow;
    type IntoIter = std::slice::Iter<'a, TimeWindow>;

    fn into_iter(self) -> Self::IntoIter {
        self.windows.iter()
    }
}

/// Default windows when none are configured.
pub const DEFAULT_WINDOWS: &[&str] = &[
    "last_7_days=7d",
    "last_1_month=30d",
    "last_6_months=6mo",
    "last_1_year=365d",
];
