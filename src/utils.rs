//! Utility functions shared across modules.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::ConfigError;

/// Find a key in a collection that matches the target case-insensitively.
///
/// Used to match the `--env` argument against configured environment names.
///
/// # Example
/// ```
/// use schedmon::utils::find_key_ignore_case;
/// let keys = vec!["PROD".to_string(), "qa".to_string()];
/// let found = find_key_ignore_case(keys.iter(), "prod");
/// assert_eq!(found, Some(&"PROD".to_string()));
/// ```
pub fn find_key_ignore_case<'a>(
    keys: impl Iterator<Item = &'a String>,
    name: &str,
) -> Option<&'a String> {
    keys.into_iter().find(|k| k.eq_ignore_ascii_case(name))
}

/// Parse a `--now` override.
///
/// Accepts RFC 3339 (converted to its own wall-clock time, offset dropped),
/// `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare date (midnight).
pub fn parse_now(s: &str) -> Result<NaiveDateTime, ConfigError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ConfigError::InvalidNow(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_key_exact_match() {
        let keys = vec!["qa".to_string(), "prod".to_string()];
        assert_eq!(find_key_ignore_case(keys.iter(), "qa"), Some(&keys[0]));
    }

    #[test]
    fn test_find_key_case_insensitive() {
        let keys = vec!["QA".to_string(), "Prod".to_string()];
        assert_eq!(find_key_ignore_case(keys.iter(), "qa"), Some(&keys[0]));
        assert_eq!(find_key_ignore_case(keys.iter(), "PROD"), Some(&keys[1]));
    }

    #[test]
    fn test_find_key_not_found() {
        let keys = vec!["qa".to_string(), "prod".to_string()];
        assert_eq!(find_key_ignore_case(keys.iter(), "uat"), None);

        let empty: Vec<String> = vec![];
        assert_eq!(find_key_ignore_case(empty.iter(), "qa"), None);
    }

    #[test]
    fn test_parse_now_formats() {
        let expected =
            NaiveDateTime::parse_from_str("2024-06-15 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_now("2024-06-15").unwrap(), expected);
        assert_eq!(parse_now("2024-06-15 00:00:00").unwrap(), expected);
        assert_eq!(parse_now("2024-06-15T00:00:00").unwrap(), expected);
        assert_eq!(parse_now("2024-06-15T00:00:00+02:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_now_invalid() {
        assert!(matches!(parse_now("yesterday"), Err(ConfigError::InvalidNow(_))));
        assert!(parse_now("2024-13-01").is_err());
    }
}
