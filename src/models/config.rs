//! Configuration types and loading.
//!
//! Configuration is layered, later layers winning key by key:
//! 1. built-in defaults
//! 2. `/etc/schedmon/config.toml`
//! 3. the user config file (see [`Config::user_config_path`])
//! 4. an explicit `--config` file
//! 5. `SCHEDMON_*` environment variables
//!
//! Command-line flags are applied on top by the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::Dimension;
use crate::error::ConfigError;
use crate::models::window::{DEFAULT_WINDOWS, ParseWindowError, WindowMode, WindowSet};
use crate::parser::DEFAULT_DATE_FORMATS;
use crate::publish::{CURRENT_GROUP, UNSCHEDULED_GROUP};
use crate::utils::find_key_ignore_case;

/// System-wide config file
const SYSTEM_CONFIG_PATH: &str = "/etc/schedmon/config.toml";

/// Minimum command and publish timeout in seconds
const MIN_TIMEOUT_SECS: u64 = 1;

/// Publish requests are retried at most once
const MAX_PUBLISH_RETRIES: u64 = 1;

/// Grouping-key values the publisher uses for non-window batches
const RESERVED_GROUPS: [&str; 2] = [UNSCHEDULED_GROUP, CURRENT_GROUP];

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,

    /// Named environments, looked up case-insensitively by `--env`
    pub environments: BTreeMap<String, EnvironmentConfig>,

    pub parser: ParserConfig,

    pub aggregate: AggregateConfig,

    pub publish: PublishConfig,
}

impl Default for Config {
    fn default() -> Self {
        let environments = ["qa", "uat", "prod"]
            .into_iter()
            .map(|name| (name.to_string(), EnvironmentConfig::default()))
            .collect();

        Self {
            scheduler: SchedulerConfig::default(),
            environments,
            parser: ParserConfig::default(),
            aggregate: AggregateConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

/// How the scheduler listing command is invoked
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Listing command name, resolved inside `bin_path`
    pub command: String,

    /// Directory containing the scheduler binaries.
    /// If not set, auto-detected via PATH
    pub bin_path: Option<PathBuf>,

    /// Shell snippet run once per process before the first command,
    /// e.g. `module load jobsched/QNA`. Its resulting environment is
    /// passed to every listing command.
    pub setup_command: Option<String>,

    /// Per-invocation timeout in seconds
    pub command_timeout_secs: u64,

    /// Maximum concurrent invocations when patterns are queried separately
    pub max_concurrency: usize,

    /// Join all patterns into a single invocation
    pub combine_patterns: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command: "autorep".to_string(),
            bin_path: None,
            setup_command: None,
            command_timeout_secs: 60,
            max_concurrency: 4,
            combine_patterns: false,
        }
    }
}

/// One named scheduler environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Scheduler instance, exported to commands as `AUTOSERV`
    pub instance: Option<String>,

    /// Scheduler server host, informational
    pub server: Option<String>,

    /// Pushgateway used for this environment unless overridden
    pub pushgateway_url: Option<String>,

    /// Overrides `scheduler.setup_command` for this environment
    pub setup_command: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    /// chrono format strings tried in order for timestamp columns
    pub date_formats: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Window specifications, e.g. `last_7_days=7d`
    pub windows: Vec<String>,

    /// Grouping dimensions, in label order
    pub dimensions: Vec<Dimension>,

    pub mode: WindowMode,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            windows: DEFAULT_WINDOWS.iter().map(|s| s.to_string()).collect(),
            dimensions: vec![Dimension::Status],
            mode: WindowMode::Cumulative,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Fallback pushgateway when the environment does not name one
    pub pushgateway_url: Option<String>,

    /// Logical job/collection key on the pushgateway
    pub job_name: String,

    /// Prefix for all metric names
    pub metric_prefix: String,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,

    /// Extra attempts per request after a failure, 0 or 1 (no backoff)
    pub retries: u32,

    /// Also publish `<prefix>_job_status_age_seconds` per job
    pub publish_ages: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: None,
            job_name: "autosys_jobs".to_string(),
            metric_prefix: "autosys".to_string(),
            timeout_secs: 10,
            retries: 1,
            publish_ages: false,
        }
    }
}

impl Config {
    /// Get the user config file path, respecting XDG_CONFIG_HOME
    ///
    /// Resolution order:
    /// 1. $XDG_CONFIG_HOME/schedmon/config.toml (if XDG_CONFIG_HOME is set)
    /// 2. $HOME/.config/schedmon/config.toml (if HOME is set)
    /// 3. dirs::config_dir()/schedmon/config.toml
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg_config.is_empty() {
                return Some(PathBuf::from(xdg_config).join("schedmon/config.toml"));
            }
        }

        if let Some(home) = std::env::var_os("HOME") {
            return Some(PathBuf::from(home).join(".config/schedmon/config.toml"));
        }

        dirs::config_dir().map(|dir| dir.join("schedmon/config.toml"))
    }

    /// Load configuration from the standard locations, an optional explicit
    /// file, and the process environment.
    ///
    /// Returns the config and any warnings encountered while loading.
    /// Problems with the implicit files are warnings unless
    /// `SCHEDMON_STRICT_CONFIG` is set; problems with the explicit file are
    /// always errors.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Vec<String>), ConfigError> {
        let strict = Self::is_strict_mode();
        let mut merged = toml::Table::new();
        let mut warnings = Vec::new();

        let mut implicit = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        implicit.extend(Self::user_config_path());

        for path in &implicit {
            match Self::read_config_file(path) {
                Ok(Some(table)) => merge_tables(&mut merged, table),
                Ok(None) => {}
                Err(e) if strict => return Err(e),
                Err(e) => warnings.push(format!("{} - ignoring file", e)),
            }
        }

        if let Some(path) = explicit {
            match Self::read_config_file(path)? {
                Some(table) => merge_tables(&mut merged, table),
                None => {
                    return Err(ConfigError::Read {
                        path: path.to_path_buf(),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    });
                }
            }
        }

        let mut config = Self::from_table(merged, explicit.unwrap_or(Path::new("<merged>")))?;
        warnings.extend(config.apply_env_overrides_from(|key| std::env::var(key).ok()));

        Ok((config, warnings))
    }

    /// Parse a single TOML document into a config (defaults fill the gaps).
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let table = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        Self::from_table(table, origin)
    }

    fn from_table(table: toml::Table, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::Value::Table(table)
                .try_into()
                .map_err(|source| ConfigError::Parse {
                    path: origin.to_path_buf(),
                    source,
                })?;

        // File-defined environments extend the built-in table
        for (name, env) in Config::default().environments {
            config.environments.entry(name).or_insert(env);
        }

        Ok(config)
    }

    /// Check if strict config mode is enabled via SCHEDMON_STRICT_CONFIG
    fn is_strict_mode() -> bool {
        std::env::var("SCHEDMON_STRICT_CONFIG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Read and type-check a config file. A missing file is `Ok(None)`.
    fn read_config_file(path: &Path) -> Result<Option<toml::Table>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let table = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        // Type-check this file on its own so errors name the right path
        Self::from_table(table.clone(), path)?;

        Ok(Some(table))
    }

    /// Apply `SCHEDMON_*` overrides read through `lookup`.
    /// Returns warnings for values that were ignored.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(val) = lookup("SCHEDMON_BIN_PATH").filter(|v| !v.is_empty()) {
            self.scheduler.bin_path = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("SCHEDMON_PUSHGATEWAY_URL").filter(|v| !v.is_empty()) {
            self.publish.pushgateway_url = Some(val);
        }

        if let Some(val) = lookup("SCHEDMON_JOB_NAME").filter(|v| !v.is_empty()) {
            self.publish.job_name = val;
        }

        if let Some(val) = lookup("SCHEDMON_COMMAND_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(secs) if secs >= MIN_TIMEOUT_SECS => {
                    self.scheduler.command_timeout_secs = secs;
                }
                _ => warnings.push(format!(
                    "Invalid value '{}' for SCHEDMON_COMMAND_TIMEOUT, expected a positive integer (seconds) - using {}",
                    val, self.scheduler.command_timeout_secs
                )),
            }
        }

        warnings
    }

    /// Check everything that does not depend on the chosen environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = self.windows()?;
        if windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        if let Some(window) = windows
            .iter()
            .find(|w| RESERVED_GROUPS.contains(&w.label.as_str()))
        {
            return Err(ConfigError::InvalidWindow(ParseWindowError {
                spec: window.label.clone(),
                reason: "label is reserved for the unscheduled and age batches".to_string(),
            }));
        }

        check_min(
            "scheduler.command_timeout_secs",
            self.scheduler.command_timeout_secs,
            MIN_TIMEOUT_SECS,
        )?;
        check_min(
            "scheduler.max_concurrency",
            self.scheduler.max_concurrency as u64,
            1,
        )?;
        check_min("publish.timeout_secs", self.publish.timeout_secs, MIN_TIMEOUT_SECS)?;
        if u64::from(self.publish.retries) > MAX_PUBLISH_RETRIES {
            return Err(ConfigError::TooLarge {
                field: "publish.retries",
                max: MAX_PUBLISH_RETRIES,
                value: u64::from(self.publish.retries),
            });
        }

        if self.publish.job_name.trim().is_empty() {
            return Err(ConfigError::MissingJobName);
        }

        if !is_valid_metric_prefix(&self.publish.metric_prefix) {
            return Err(ConfigError::InvalidMetricPrefix(
                self.publish.metric_prefix.clone(),
            ));
        }

        if let Some(url) = &self.publish.pushgateway_url {
            validate_url(url)?;
        }
        for env in self.environments.values() {
            if let Some(url) = &env.pushgateway_url {
                validate_url(url)?;
            }
        }

        Ok(())
    }

    /// Parsed window set.
    pub fn windows(&self) -> Result<WindowSet, ConfigError> {
        Ok(WindowSet::parse(&self.aggregate.windows)?)
    }

    /// Look up an environment by name, ignoring case.
    pub fn environment(&self, name: &str) -> Result<(&str, &EnvironmentConfig), ConfigError> {
        find_key_ignore_case(self.environments.keys(), name)
            .and_then(|key| self.environments.get_key_value(key))
            .map(|(key, env)| (key.as_str(), env))
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.to_string(),
                known: self.environments.keys().cloned().collect(),
            })
    }

    /// Pushgateway for an environment: its own URL, else the global one.
    pub fn pushgateway_url(&self, env_name: &str) -> Result<String, ConfigError> {
        let (key, env) = self.environment(env_name)?;
        env.pushgateway_url
            .clone()
            .or_else(|| self.publish.pushgateway_url.clone())
            .ok_or_else(|| ConfigError::MissingPushgateway(key.to_string()))
    }
}

fn check_min(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::OutOfRange { field, min, value });
    }
    Ok(())
}

/// Validate an HTTP(S) URL.
pub fn validate_url(url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(())
}

fn is_valid_metric_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Deep-merge `overlay` into `base`; tables merge, other values replace.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
