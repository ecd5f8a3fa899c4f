//! Data models for scheduler job status.
//!
//! This module provides the job record and pattern types, the status
//! taxonomy, rolling time windows, and configuration types.

mod config;
mod job;
mod state;
mod window;

// Re-export all public types from submodules
pub use config::{
    AggregateConfig, Config, EnvironmentConfig, ParserConfig, PublishConfig, SchedulerConfig,
    validate_url,
};
pub use job::{JobPattern, JobRecord};
pub use state::{STATUS_CODES, StatusClass, classify};
pub use window::{DEFAULT_WINDOWS, ParseWindowError, TimeWindow, WindowMode, WindowSet};
