//! Interface to the scheduler's status listing command
//!
//! This module locates the listing binary (`autorep` by default), prepares the
//! scheduler environment once per process, and runs the command for one or
//! more job patterns with a timeout and cancellation. Output is returned as
//! raw lines; parsing happens in [`crate::parser`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::RunnerError;
use crate::models::{EnvironmentConfig, JobPattern, SchedulerConfig};

/// Environment variable naming the scheduler instance
pub const INSTANCE_ENV_VAR: &str = "AUTOSERV";

/// Upper bound for the environment setup step
const SETUP_TIMEOUT: Duration = Duration::from_secs(120);

/// How the scheduler binary path was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathResolution {
    /// Explicitly configured via config file or environment variable
    Configured,
    /// Auto-detected via PATH
    AutoDetected,
    /// Fell back to /usr/bin and the command was found there
    Fallback,
    /// Fell back to /usr/bin but the command was NOT found (likely misconfigured)
    FallbackUnverified,
}

/// Result of finding the scheduler binary directory
#[derive(Debug, Clone)]
pub struct BinPathResult {
    pub path: PathBuf,
    pub resolution: PathResolution,
}

/// Find the directory containing the scheduler binaries.
///
/// Resolution order:
/// 1. Explicit path from configuration, if it is an existing directory.
/// 2. The directory of `command` found via PATH.
/// 3. `/usr/bin`.
///
/// When a setup command is configured the binary usually only appears on
/// PATH after setup, so an unverified fallback is not fatal here; the
/// command itself reports a spawn error if it really is missing.
pub fn find_scheduler_bin_path(config_path: Option<&Path>, command: &str) -> BinPathResult {
    if let Some(path) = config_path {
        if path.is_dir() {
            return BinPathResult {
                path: path.to_path_buf(),
                resolution: PathResolution::Configured,
            };
        }
        tracing::warn!(
            path = %path.display(),
            "Configured scheduler bin_path is not a valid directory, trying auto-detection"
        );
    }

    if let Ok(found) = which::which(command)
        && let Some(parent) = found.parent()
    {
        return BinPathResult {
            path: parent.to_path_buf(),
            resolution: PathResolution::AutoDetected,
        };
    }

    let fallback_path = PathBuf::from("/usr/bin");
    if fallback_path.join(command).exists() {
        BinPathResult {
            path: fallback_path,
            resolution: PathResolution::Fallback,
        }
    } else {
        tracing::debug!(
            command,
            fallback = %fallback_path.display(),
            "Scheduler command not found in PATH or fallback directory"
        );
        BinPathResult {
            path: fallback_path,
            resolution: PathResolution::FallbackUnverified,
        }
    }
}

/// A scheduler environment session.
///
/// Built once per process from the selected `[environments.NAME]` entry and
/// shared by every command invocation. The optional setup command runs at
/// most once; the variables it leaves behind are applied to every command.
#[derive(Debug)]
pub struct Environment {
    name: String,
    instance: Option<String>,
    server: Option<String>,
    setup_command: Option<String>,
    setup_env: OnceCell<Vec<(String, String)>>,
}

impl Environment {
    pub fn new(name: &str, config: &EnvironmentConfig, default_setup: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            instance: config.instance.clone(),
            server: config.server.clone(),
            setup_command: config
                .setup_command
                .clone()
                .or_else(|| default_setup.map(str::to_string)),
            setup_env: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// True once the setup step has completed (or there was none).
    pub fn is_loaded(&self) -> bool {
        self.setup_env.initialized()
    }

    /// Run the setup command if it has not run yet.
    ///
    /// Idempotent: later calls return the cached variables without running
    /// anything. A failed setup is not cached, so a later call retries it.
    pub async fn ensure_loaded(&self) -> Result<&[(String, String)], RunnerError> {
        self.setup_env
            .get_or_try_init(|| async {
                match &self.setup_command {
                    Some(setup) => run_setup(&self.name, setup).await,
                    None => Ok(Vec::new()),
                }
            })
            .await
            .map(Vec::as_slice)
    }

    /// Apply the session's variables to a command.
    fn apply(&self, cmd: &mut Command, setup_env: &[(String, String)]) {
        cmd.envs(setup_env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(instance) = &self.instance {
            cmd.env(INSTANCE_ENV_VAR, instance);
        }
    }
}

/// Run `setup` in a shell and capture the environment it leaves behind.
async fn run_setup(env_name: &str, setup: &str) -> Result<Vec<(String, String)>, RunnerError> {
    tracing::info!(environment = env_name, setup, "Loading scheduler environment");

    let script = format!("{} >/dev/null && env -0", setup);
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&script)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(SETUP_TIMEOUT, cmd.output()).await {
        Err(_) => {
            return Err(RunnerError::SetupFailed(format!(
                "'{}' timed out after {}s",
                setup,
                SETUP_TIMEOUT.as_secs()
            )));
        }
        Ok(Err(e)) => {
            return Err(RunnerError::SetupFailed(format!(
                "could not run '{}': {}",
                setup, e
            )));
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RunnerError::SetupFailed(format!(
            "'{}' exited with {}: {}",
            setup,
            output.status,
            stderr.trim()
        )));
    }

    let vars = parse_env_block(&output.stdout);
    tracing::debug!(environment = env_name, vars = vars.len(), "Scheduler environment loaded");
    Ok(vars)
}

/// Parse NUL-separated `KEY=VALUE` pairs as printed by `env -0`.
fn parse_env_block(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|&b| b == 0)
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Output of one invocation, tagged with the pattern argument it ran with.
#[derive(Debug)]
pub struct FetchOutcome {
    pub pattern: String,
    pub result: Result<Vec<String>, RunnerError>,
}

/// Runs the listing command within an [`Environment`].
#[derive(Debug, Clone)]
pub struct SchedulerClient {
    program: PathBuf,
    environment: Arc<Environment>,
    timeout: Duration,
    max_concurrency: usize,
}

impl SchedulerClient {
    pub fn new(program: PathBuf, environment: Arc<Environment>, timeout: Duration) -> Self {
        Self {
            program,
            environment,
            timeout,
            max_concurrency: 1,
        }
    }

    /// Build a client from configuration, resolving the binary directory.
    pub fn from_config(config: &SchedulerConfig, environment: Arc<Environment>) -> Self {
        let bin = find_scheduler_bin_path(config.bin_path.as_deref(), &config.command);
        tracing::debug!(
            path = %bin.path.display(),
            resolution = ?bin.resolution,
            "Resolved scheduler bin path"
        );

        Self::new(
            bin.path.join(&config.command),
            environment,
            Duration::from_secs(config.command_timeout_secs),
        )
        .with_max_concurrency(config.max_concurrency)
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Run the listing command for one pattern argument.
    ///
    /// `history` selects an earlier run (`-r -N`). The child is killed when
    /// the timeout expires or `cancel` fires.
    pub async fn fetch(
        &self,
        pattern: &str,
        history: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, RunnerError> {
        let setup_env = self.environment.ensure_loaded().await?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-J").arg(pattern);
        if let Some(n) = history {
            cmd.arg("-r").arg(format!("-{}", n));
        }
        self.environment.apply(&mut cmd, setup_env);
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.program.display(), pattern, ?history, "Running scheduler command");

        let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RunnerError::Cancelled { pattern: pattern.to_string() });
            }
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Err(_) => {
                    return Err(RunnerError::CommandTimeout {
                        pattern: pattern.to_string(),
                        timeout: self.timeout,
                    });
                }
                Ok(Err(source)) => {
                    return Err(RunnerError::Io { pattern: pattern.to_string(), source });
                }
                Ok(Ok(output)) => output,
            },
        };

        if !output.status.success() {
            return Err(RunnerError::CommandFailed {
                pattern: pattern.to_string(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(str::to_string).collect())
    }

    /// Fetch every pattern.
    ///
    /// With `combine` the patterns are joined into a single comma-separated
    /// argument and one command runs. Otherwise each pattern runs as its own
    /// command, at most `max_concurrency` at a time. Outcomes come back in
    /// pattern order.
    pub async fn fetch_all(
        &self,
        patterns: &[JobPattern],
        history: Option<u32>,
        combine: bool,
        cancel: &CancellationToken,
    ) -> Vec<FetchOutcome> {
        if patterns.is_empty() {
            return Vec::new();
        }

        if combine {
            let joined = patterns
                .iter()
                .map(|p| p.pattern.as_str())
                .collect::<Vec<_>>()
                .join(",");
            let result = self.fetch(&joined, history, cancel).await;
            return vec![FetchOutcome {
                pattern: joined,
                result,
            }];
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let handles: Vec<_> = patterns
            .iter()
            .map(|p| {
                let client = self.clone();
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                let pattern = p.pattern.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return Err(RunnerError::Cancelled { pattern });
                    };
                    client.fetch(&pattern, history, &cancel).await
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (p, handle) in patterns.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(RunnerError::Join {
                    pattern: p.pattern.clone(),
                    reason: e.to_string(),
                }),
            };
            outcomes.push(FetchOutcome {
                pattern: p.pattern.clone(),
                result,
            });
        }
        outcomes
    }
}
