//! Job status taxonomy and the scheduler status code table.
//!
//! This module is the single place where scheduler-specific status codes are
//! interpreted. Everything downstream (aggregation, publishing, display)
//! works with [`StatusClass`] and never looks at raw codes.

use serde::{Deserialize, Serialize};

// ============================================================================
// Status Code Table
// ============================================================================

/// Mapping from scheduler status strings to their class.
///
/// Each entry is `(class, &[variants])` where variants are the strings the
/// scheduler may print for that class: the two-letter code shown in the `ST`
/// column and the full name used by detail reports. Matching is
/// case-insensitive.
///
/// Codes not listed here (RU, AC, IN, ST, QU, ...) are real scheduler states
/// but fall outside the taxonomy and classify as [`StatusClass::Unknown`].
pub const STATUS_CODES: &[(StatusClass, &[&str])] = &[
    (StatusClass::Success, &["SU", "SUCCESS"]),
    (StatusClass::Failure, &["FA", "FAILURE"]),
    (StatusClass::OnIce, &["OI", "ON_ICE"]),
    (StatusClass::OnHold, &["OH", "ON_HOLD"]),
    (StatusClass::Terminated, &["TE", "TERMINATED"]),
];

// ============================================================================
// Status Class Enum
// ============================================================================

/// Closed status taxonomy used by aggregation and publishing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    Failure,
    OnIce,
    OnHold,
    Terminated,
    #[default]
    Unknown,
}

impl StatusClass {
    /// All classes in display order.
    pub const ALL: [StatusClass; 6] = [
        StatusClass::Success,
        StatusClass::Failure,
        StatusClass::OnIce,
        StatusClass::OnHold,
        StatusClass::Terminated,
        StatusClass::Unknown,
    ];

    /// Classify a raw scheduler status string.
    ///
    /// Total: any input, including the empty string, yields a class.
    /// Surrounding whitespace is ignored and so is case.
    #[must_use]
    pub fn from_status_code(raw: &str) -> Self {
        let code = raw.trim();
        STATUS_CODES
            .iter()
            .find(|(_, variants)| variants.iter().any(|v| v.eq_ignore_ascii_case(code)))
            .map(|(class, _)| *class)
            .unwrap_or_default()
    }

    /// Label value used in published metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::OnIce => "on_ice",
            Self::OnHold => "on_hold",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }

    /// Short display string for tables.
    #[must_use]
    pub fn short_str(&self) -> &'static str {
        match self {
            Self::Success => "SU",
            Self::Failure => "FA",
            Self::OnIce => "OI",
            Self::OnHold => "OH",
            Self::Terminated => "TE",
            Self::Unknown => "?",
        }
    }

    /// Jobs parked by an operator rather than finished by the scheduler.
    #[must_use]
    pub fn is_parked(&self) -> bool {
        matches!(self, Self::OnIce | Self::OnHold)
    }
}

impl std::fmt::Display for StatusClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw status code. Shorthand for [`StatusClass::from_status_code`].
#[must_use]
pub fn classify(raw: &str) -> StatusClass {
    StatusClass::from_status_code(raw)
}
