//! Error taxonomy.
//!
//! Every failure mode of a run is a distinct value:
//! - [`RunnerError`]: the scheduler command could not produce usable output
//!   for one pattern. Recoverable; other patterns continue.
//! - [`PublishError`]: one metric batch could not be delivered. Recoverable;
//!   other batches continue.
//! - [`ConfigError`]: operator mistake. Fatal, raised before any command runs.
//!
//! Unparseable output lines are not errors; the parser counts them in its
//! [`ParseReport`](crate::parser::ParseReport).

use std::path::PathBuf;
use std::time::Duration;

/// Failure of a single scheduler command invocation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The binary could not be started (not found, permission denied, ...)
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully
    #[error("{pattern}: command failed with exit code {}: {}", display_code(.exit_code), .stderr.trim())]
    CommandFailed {
        pattern: String,
        /// `None` when the process was killed by a signal
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The command exited successfully but printed no job rows
    #[error("{pattern}: command produced no usable output ({dropped} unrecognized line(s))")]
    NoUsableOutput { pattern: String, dropped: usize },

    /// The command did not finish within its time budget and was killed
    #[error("{pattern}: command timed out after {}s", .timeout.as_secs_f64())]
    CommandTimeout { pattern: String, timeout: Duration },

    /// The run was cancelled while the command was in flight
    #[error("{pattern}: command cancelled")]
    Cancelled { pattern: String },

    /// The environment setup step failed; no command can run
    #[error("environment setup failed: {0}")]
    SetupFailed(String),

    /// I/O error while waiting for the process
    #[error("{pattern}: I/O error while reading command output: {source}")]
    Io {
        pattern: String,
        #[source]
        source: std::io::Error,
    },

    /// The task running the command panicked or was aborted
    #[error("{pattern}: command task failed: {reason}")]
    Join { pattern: String, reason: String },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (killed by signal)".to_string(), |c| c.to_string())
}

/// Failure to deliver one metric batch.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Transport failure (connection refused, timeout, DNS, ...)
    #[error("publish to {url} failed after {attempts} attempt(s): {reason}")]
    PublishFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// The sink answered with a non-success status
    #[error("{url} rejected the request with HTTP {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },

    /// Samples could not be encoded in the exposition format
    #[error("failed to encode metrics: {0}")]
    Encode(String),

    /// The grouping key could not be turned into a sink URL
    #[error("invalid sink URL '{0}'")]
    InvalidUrl(String),

    /// The sink answered with a body that could not be read
    #[error("unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },
}

/// Invalid configuration. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown environment '{name}' (known: {})", .known.join(", "))]
    UnknownEnvironment { name: String, known: Vec<String> },

    #[error(transparent)]
    InvalidWindow(#[from] crate::models::ParseWindowError),

    #[error("no windows configured")]
    NoWindows,

    #[error("no job patterns given")]
    NoPatterns,

    #[error("invalid job pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid metric prefix '{0}' (must match [a-zA-Z_:][a-zA-Z0-9_:]*)")]
    InvalidMetricPrefix(String),

    #[error("no pushgateway URL for environment '{0}' (use --pushgateway-url or set publish.pushgateway_url)")]
    MissingPushgateway(String),

    #[error("job name must not be empty")]
    MissingJobName,

    #[error("invalid timestamp '{0}' (expected RFC 3339 or YYYY-MM-DD[ HH:MM:SS])")]
    InvalidNow(String),

    #[error("{field} must be at least {min}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        value: u64,
    },

    #[error("{field} must be at most {max}, got {value}")]
    TooLarge {
        field: &'static str,
        max: u64,
        value: u64,
    },

    #[error("could not read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
