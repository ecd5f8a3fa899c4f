//! schedmon - scheduler job status metrics
//!
//! Runs the scheduler's listing command for a set of job-name patterns,
//! parses the text report into [`models::JobRecord`]s, classifies their
//! statuses, counts them per rolling time window and publishes the counts to
//! a Prometheus Pushgateway.
//!
//! The pieces are usable on their own:
//! - [`scheduler::SchedulerClient`] runs the command with a load-once
//!   environment, per-command timeouts and cancellation
//! - [`parser::OutputParser`] turns report text into records
//! - [`aggregate::Aggregator`] buckets classified jobs by window and dimension
//! - [`publish::Publisher`] writes batches to any [`publish::MetricsSink`]
//! - [`pipeline::run`] strings them together and reports the outcome

pub mod aggregate;
pub mod display;
pub mod error;
pub mod formatting;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod publish;
pub mod scheduler;
pub mod utils;
