//! Shared formatting utilities for CLI output
//!
//! String truncation, duration and timestamp formatting used by the tables in
//! [`crate::display`].

use chrono::NaiveDateTime;

/// Layout constants used by the CLI tables
pub mod layout {
    pub const TABLE_WIDTH: usize = 200;
    pub const JOB_NAME_LEN: usize = 64;
    pub const LABELS_LEN: usize = 80;
}

/// Truncate a string to a maximum length (in characters), adding "..." at the end if truncated.
///
/// This function is Unicode-safe and counts characters, not bytes.
///
/// # Examples
/// ```
/// use schedmon::formatting::truncate_string;
/// assert_eq!(truncate_string("hello", 10), "hello");
/// assert_eq!(truncate_string("hello world", 8), "hello...");
/// assert_eq!(truncate_string("ab", 2), "ab");
/// ```
#[must_use]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        // Edge case: if max_len is very small, just truncate without ellipsis
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format duration in verbose human-readable style (e.g., "2d 3h", "5h 30m").
///
/// Shows at most 2 time units for readability.
///
/// # Examples
/// ```
/// use schedmon::formatting::format_duration_human;
/// assert_eq!(format_duration_human(0), "0s");
/// assert_eq!(format_duration_human(45), "45s");
/// assert_eq!(format_duration_human(3600), "1h");
/// assert_eq!(format_duration_human(3660), "1h 1m");
/// assert_eq!(format_duration_human(90000), "1d 1h");
/// ```
#[must_use]
pub fn format_duration_human(seconds: u64) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }

    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else if minutes > 0 {
        if secs > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}m", minutes)
        }
    } else {
        format!("{}s", secs)
    }
}

/// Format a job age in seconds. Negative ages (start after "now") show as "in the future".
#[must_use]
pub fn format_age(age_secs: Option<i64>) -> String {
    match age_secs {
        None => "-".to_string(),
        Some(secs) if secs < 0 => "in the future".to_string(),
        Some(secs) => format_duration_human(secs.unsigned_abs()),
    }
}

/// Format an optional timestamp, `-` when absent.
#[must_use]
pub fn format_timestamp(ts: Option<NaiveDateTime>) -> String {
    ts.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Render labels as `name=value` pairs separated by commas.
#[must_use]
pub fn format_labels<'a>(labels: impl IntoIterator<Item = (&'a String, &'a String)>) -> String {
    let joined = labels
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        "(all)".to_string()
    } else {
        joined
    }
}
