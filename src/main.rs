//! schedmon - scheduler job status metrics for the Prometheus Pushgateway

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use schedmon::aggregate::{Aggregation, Aggregator, ClassifiedJob, Dimension};
use schedmon::display::{
    format_aggregation, format_environments, format_jobs, format_parse_summary, format_run_summary,
};
use schedmon::error::ConfigError;
use schedmon::models::{Config, JobPattern, WindowMode, validate_url};
use schedmon::parser::OutputParser;
use schedmon::pipeline::{self, Collection, ParseSummary, RunPlan};
use schedmon::publish::{MemorySink, PushgatewaySink, Publisher};
use schedmon::scheduler::{Environment, SchedulerClient};
use schedmon::utils::parse_now;

/// Exit code for invalid configuration or arguments
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "schedmon")]
#[command(about = "Scheduler job status metrics for the Prometheus Pushgateway", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output (debug)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file, layered on top of the system and user config
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Which jobs to fetch and how
#[derive(Args)]
struct SelectArgs {
    /// Scheduler environment (see `schedmon envs`)
    #[arg(short, long)]
    env: String,

    /// Job-name pattern, optionally prefixed with a group name (repeatable)
    #[arg(short, long = "pattern", value_name = "[GROUP=]PATTERN", required = true)]
    patterns: Vec<JobPattern>,

    /// Report the N-th previous run instead of the latest
    #[arg(long, value_name = "N")]
    history: Option<u32>,

    /// Query all patterns with a single command
    #[arg(long)]
    combine: bool,
}

/// How to bucket jobs
#[derive(Args)]
struct AggregateArgs {
    /// Time window as LABEL=DURATION, e.g. last_7_days=7d (repeatable)
    #[arg(short, long = "window", value_name = "SPEC")]
    windows: Vec<String>,

    /// Grouping dimensions (comma-separated)
    #[arg(short, long, value_name = "DIMS", value_delimiter = ',')]
    group_by: Vec<Dimension>,

    /// Window assignment mode
    #[arg(long)]
    mode: Option<WindowMode>,

    /// Reference time instead of the current local time
    #[arg(long, value_name = "TIMESTAMP")]
    now: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch job statuses and push window counts to the Pushgateway
    Push {
        #[command(flatten)]
        select: SelectArgs,

        #[command(flatten)]
        aggregate: AggregateArgs,

        /// Pushgateway base URL (overrides the environment's)
        #[arg(long, value_name = "URL")]
        pushgateway_url: Option<String>,

        /// Job name used as the Pushgateway grouping key
        #[arg(long, value_name = "KEY")]
        job_name: Option<String>,

        /// Cancel in-flight commands after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,

        /// Print the metrics instead of pushing them
        #[arg(long)]
        dry_run: bool,

        /// Exit non-zero when only part of the run succeeded
        #[arg(long)]
        fail_on_partial: bool,

        /// Also publish per-job status ages
        #[arg(long)]
        publish_ages: bool,
    },

    /// Fetch job statuses and print the window counts
    Report {
        #[command(flatten)]
        select: SelectArgs,

        #[command(flatten)]
        aggregate: AggregateArgs,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Parse saved scheduler output and print the window counts
    Parse {
        /// File with scheduler output, `-` or nothing for stdin
        file: Option<PathBuf>,

        /// Job-name pattern for group attribution (repeatable)
        #[arg(short, long = "pattern", value_name = "[GROUP=]PATTERN")]
        patterns: Vec<JobPattern>,

        #[command(flatten)]
        aggregate: AggregateArgs,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// List configured environments
    #[command(alias = "env")]
    Envs,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) if e.chain().any(|cause| cause.is::<ConfigError>()) => {
            eprintln!("{} {:#}", "Configuration error:".bright_red(), e);
            EXIT_CONFIG
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".bright_red(), e);
            pipeline::EXIT_TOTAL_FAILURE
        }
    };

    std::process::exit(code);
}

/// Log to stderr. `-v`/`-q` win over `RUST_LOG`.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,schedmon=debug")
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,schedmon=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Push {
            select,
            aggregate,
            pushgateway_url,
            job_name,
            deadline,
            dry_run,
            fail_on_partial,
            publish_ages,
        } => {
            if let Some(name) = job_name {
                config.publish.job_name = name;
            }
            if publish_ages {
                config.publish.publish_ages = true;
            }
            apply_aggregate_args(&mut config, &aggregate)?;
            if let Some(url) = &pushgateway_url {
                validate_url(url)?;
            }

            let push = PushOptions {
                pushgateway_url,
                deadline: deadline.map(Duration::from_secs),
                dry_run,
                fail_on_partial,
            };
            handle_push_command(&config, &select, &aggregate, &push)
        }
        Commands::Report {
            select,
            aggregate,
            format,
        } => {
            apply_aggregate_args(&mut config, &aggregate)?;
            let (output, code) = handle_report_command(&config, &select, &aggregate, format)?;
            println!("{}", output);
            Ok(code)
        }
        Commands::Parse {
            file,
            patterns,
            aggregate,
            format,
        } => {
            apply_aggregate_args(&mut config, &aggregate)?;
            let output =
                handle_parse_command(&config, file.as_deref(), &patterns, &aggregate, format)?;
            println!("{}", output);
            Ok(0)
        }
        Commands::Envs => {
            println!("{}", format_environments(&config));
            Ok(0)
        }
    }
}

/// Layered config plus `SCHEDMON_*` overrides.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let (mut config, warnings) = Config::load(explicit)?;
    for warning in warnings {
        tracing::warn!("{}", warning);
    }
    for warning in config.apply_env_overrides_from(|key| std::env::var(key).ok()) {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

/// CLI window/grouping flags replace the configured ones, then validate.
fn apply_aggregate_args(config: &mut Config, args: &AggregateArgs) -> Result<(), ConfigError> {
    if !args.windows.is_empty() {
        config.aggregate.windows = args.windows.clone();
    }
    if !args.group_by.is_empty() {
        config.aggregate.dimensions = args.group_by.clone();
    }
    if let Some(mode) = args.mode {
        config.aggregate.mode = mode;
    }
    config.validate()
}

fn resolve_now(args: &AggregateArgs) -> Result<NaiveDateTime, ConfigError> {
    match &args.now {
        Some(s) => parse_now(s),
        None => Ok(Local::now().naive_local()),
    }
}

fn build_aggregator(config: &Config) -> Result<Aggregator, ConfigError> {
    Ok(Aggregator::new(
        config.windows()?,
        &config.aggregate.dimensions,
        config.aggregate.mode,
    ))
}

fn build_plan(config: &Config, select: &SelectArgs, now: NaiveDateTime) -> Result<RunPlan, ConfigError> {
    if select.patterns.is_empty() {
        return Err(ConfigError::NoPatterns);
    }
    Ok(RunPlan {
        patterns: select.patterns.clone(),
        history: select.history,
        combine: select.combine || config.scheduler.combine_patterns,
        now,
        publish_ages: config.publish.publish_ages,
    })
}

fn build_client(config: &Config, env_name: &str) -> Result<SchedulerClient, ConfigError> {
    let (name, env) = config.environment(env_name)?;
    let environment = Environment::new(name, env, config.scheduler.setup_command.as_deref());
    Ok(SchedulerClient::from_config(
        &config.scheduler,
        Arc::new(environment),
    ))
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: &CancellationToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupted, cancelling in-flight commands");
        token.cancel();
    })
    .context("Error setting Ctrl-C handler")
}

struct PushOptions {
    pushgateway_url: Option<String>,
    deadline: Option<Duration>,
    dry_run: bool,
    fail_on_partial: bool,
}

fn handle_push_command(
    config: &Config,
    select: &SelectArgs,
    aggregate: &AggregateArgs,
    push: &PushOptions,
) -> Result<i32> {
    let now = resolve_now(aggregate)?;
    let plan = build_plan(config, select, now)?;
    let client = build_client(config, &select.env)?;
    let aggregator = build_aggregator(config)?;
    let parser = OutputParser::new(config.parser.date_formats.clone());

    // Resolve the target before running anything
    let url = if push.dry_run {
        None
    } else {
        match &push.pushgateway_url {
            Some(url) => Some(url.clone()),
            None => Some(config.pushgateway_url(client.environment().name())?),
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel)?;

    let runtime = build_runtime()?;
    let report = runtime.block_on(async {
        let deadline = push
            .deadline
            .map(|d| pipeline::cancel_after(cancel.clone(), d));

        let report = match &url {
            Some(url) => {
                let sink = PushgatewaySink::new(
                    url,
                    Duration::from_secs(config.publish.timeout_secs),
                )
                .with_context(|| format!("Invalid pushgateway URL '{}'", url))?;
                let publisher = Publisher::new(
                    sink,
                    &config.publish.job_name,
                    &config.publish.metric_prefix,
                )
                .with_retries(config.publish.retries);
                pipeline::run(&client, &parser, &aggregator, &publisher, &plan, &cancel).await
            }
            None => {
                let publisher = Publisher::new(
                    MemorySink::new(),
                    &config.publish.job_name,
                    &config.publish.metric_prefix,
                )
                .with_retries(config.publish.retries);
                let report =
                    pipeline::run(&client, &parser, &aggregator, &publisher, &plan, &cancel).await;
                println!(
                    "{}",
                    publisher
                        .sink()
                        .render()
                        .context("Failed to render dry-run metrics")?
                );
                report
            }
        };

        if let Some(handle) = deadline {
            handle.abort();
        }
        anyhow::Ok(report)
    })?;

    eprintln!("{}", format_run_summary(&report));
    Ok(report.outcome.exit_code(push.fail_on_partial))
}

#[derive(Serialize)]
struct JsonReport<'a> {
    environment: Option<&'a str>,
    now: String,
    parse: ParseSummary,
    failed_patterns: Vec<String>,
    jobs: &'a [ClassifiedJob],
    aggregation: &'a Aggregation,
}

fn handle_report_command(
    config: &Config,
    select: &SelectArgs,
    aggregate: &AggregateArgs,
    format: OutputFormat,
) -> Result<(String, i32)> {
    let now = resolve_now(aggregate)?;
    let plan = build_plan(config, select, now)?;
    let client = build_client(config, &select.env)?;
    let aggregator = build_aggregator(config)?;
    let parser = OutputParser::new(config.parser.date_formats.clone());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel)?;

    let runtime = build_runtime()?;
    let collection: Collection =
        runtime.block_on(pipeline::collect(&client, &parser, &plan, &cancel));

    for failure in &collection.failed {
        eprintln!("{} {}", "✗".bright_red(), failure.error);
    }
    let code = if collection.has_output() {
        0
    } else {
        pipeline::EXIT_TOTAL_FAILURE
    };

    let aggregation = aggregator.aggregate(&collection.jobs, now);
    let output = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&JsonReport {
            environment: Some(client.environment().name()),
            now: now.to_string(),
            parse: collection.parse,
            failed_patterns: collection
                .failed
                .iter()
                .map(|f| f.error.to_string())
                .collect(),
            jobs: &collection.jobs,
            aggregation: &aggregation,
        })?,
        OutputFormat::Table => format!(
            "{}\n{}\n{}",
            format_jobs(&collection.jobs, now),
            format_aggregation(&aggregation),
            format_parse_summary(&collection)
        ),
    };

    Ok((output, code))
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn handle_parse_command(
    config: &Config,
    file: Option<&Path>,
    patterns: &[JobPattern],
    aggregate: &AggregateArgs,
    format: OutputFormat,
) -> Result<String> {
    let now = resolve_now(aggregate)?;
    let aggregator = build_aggregator(config)?;
    let parser = OutputParser::new(config.parser.date_formats.clone());

    let text = read_input(file)?;
    let report = parser.parse_str(&text);

    let collection = Collection {
        parse: ParseSummary::from(&report),
        jobs: pipeline::classify_records(report.records, patterns),
        succeeded: vec![file.map_or_else(|| "-".to_string(), |p| p.display().to_string())],
        failed: Vec::new(),
    };
    let aggregation = aggregator.aggregate(&collection.jobs, now);

    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&JsonReport {
            environment: None,
            now: now.to_string(),
            parse: collection.parse,
            failed_patterns: Vec::new(),
            jobs: &collection.jobs,
            aggregation: &aggregation,
        })?,
        OutputFormat::Table => format!(
            "{}\n{}\n{}",
            format_jobs(&collection.jobs, now),
            format_aggregation(&aggregation),
            format_parse_summary(&collection)
        ),
    })
}
