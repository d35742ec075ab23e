//! Typed configuration model.
//!
//! `TaskConfig`/`RunSettingsConfig`/`PrompterConfig` mirror the on-disk
//! TOML shape as a serde-deserialized "raw" struct, kept separate from
//! `ValidatedConfig`, the validated domain type built from it.
//! `prompter-core` owns validation only; parsing a config *file* from
//! disk is left to the caller (the CLI crate) -- but a
//! `load_str`/`load_file` convenience pair is kept here so the core is
//! independently testable without the CLI crate.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ConfigError, ConfigViolation};
use crate::graph::TaskGraph;

/// Task names a task may not use.
pub const RESERVED_WORDS: [&str; 4] = ["next", "stop", "retry", "repeat"];

/// On-disk shape of one task table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub name: String,
    pub prompt: String,
    pub verify_command: String,
    #[serde(default)]
    pub verify_success_code: i32,
    #[serde(default = "default_on_success")]
    pub on_success: String,
    #[serde(default = "default_on_failure")]
    pub on_failure: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub resume_previous_session: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub exclusive: bool,
    /// Reserved but not used by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_required: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_required: Option<f64>,
}

fn default_on_success() -> String {
    "next".to_string()
}

fn default_on_failure() -> String {
    "stop".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

impl TaskConfig {
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn depends_on_set(&self) -> HashSet<&str> {
        self.depends_on.iter().map(String::as_str).collect()
    }
}

/// How much progress output a run should produce. Never rendered by the
/// core; only passed to an injected `ProgressSink` -- terminal rendering
/// is entirely the CLI crate's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    #[default]
    Auto,
    Rich,
    Simple,
    None,
}

impl fmt::Display for ProgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressMode::Auto => "auto",
            ProgressMode::Rich => "rich",
            ProgressMode::Simple => "simple",
            ProgressMode::None => "none",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid progress mode {0:?} (expected auto, rich, simple, or none)")]
pub struct ProgressModeParseError(String);

impl FromStr for ProgressMode {
    type Err = ProgressModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "rich" => Ok(Self::Rich),
            "simple" => Ok(Self::Simple),
            "none" => Ok(Self::None),
            other => Err(ProgressModeParseError(other.to_string())),
        }
    }
}

/// On-disk shape of the `[settings]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSettingsConfig {
    /// Seconds; delay between AI completion and verification.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: u32,
    #[serde(default = "default_true")]
    pub enable_parallel: bool,
    #[serde(default)]
    pub allow_infinite_loops: bool,
    #[serde(default)]
    pub progress_mode: ProgressMode,
}

fn default_check_interval() -> u64 {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_parallel_tasks() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

impl Default for RunSettingsConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            max_retries: default_max_retries(),
            working_directory: None,
            max_parallel_tasks: default_max_parallel_tasks(),
            enable_parallel: true,
            allow_infinite_loops: false,
            progress_mode: ProgressMode::default(),
        }
    }
}

/// Deserialized but not-yet-validated configuration (one `settings` table
/// plus an ordered task list).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrompterConfig {
    #[serde(default)]
    pub settings: RunSettingsConfig,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl PrompterConfig {
    /// Parse a TOML document into a `PrompterConfig` without validating it.
    ///
    /// `toml`'s own span reporting (line/column of the first offending
    /// token) is preserved by returning the `toml::de::Error` unmodified.
    pub fn parse_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Validate this configuration, consuming it.
    ///
    /// Two-phase: field-level checks first (unknown flow targets,
    /// reserved task names, zero `max_attempts`, ...), then structural
    /// validation via the three-color DFS in `graph::TaskGraph`.
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let mut violations = Vec::new();

        if self.settings.max_parallel_tasks == 0 {
            violations.push(ConfigViolation::global(
                "settings.max_parallel_tasks must be >= 1",
            ));
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                violations.push(ConfigViolation::global("task name must not be empty"));
                continue;
            }
            if RESERVED_WORDS.contains(&task.name.as_str()) {
                violations.push(ConfigViolation::task(
                    &task.name,
                    format!("task name {:?} is a reserved word", task.name),
                ));
            }
            if !seen_names.insert(task.name.as_str()) {
                violations.push(ConfigViolation::task(
                    &task.name,
                    "duplicate task name",
                ));
            }
            if task.max_attempts == 0 {
                violations.push(ConfigViolation::task(
                    &task.name,
                    "max_attempts must be a positive integer",
                ));
            }
            if task.on_failure == "stop" && task.max_attempts > 1 {
                tracing::warn!(
                    task = %task.name,
                    max_attempts = task.max_attempts,
                    "on_failure = stop ignores max_attempts (it acts after the first failed attempt)"
                );
            }
        }

        let task_names: HashSet<&str> = self.tasks.iter().map(|t| t.name.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !task_names.contains(dep.as_str()) {
                    violations.push(ConfigViolation::task(
                        &task.name,
                        format!("depends_on references unknown task {dep:?}"),
                    ));
                }
            }
            for (field, value) in [("on_success", &task.on_success), ("on_failure", &task.on_failure)]
            {
                if !RESERVED_WORDS.contains(&value.as_str()) && !task_names.contains(value.as_str())
                {
                    violations.push(ConfigViolation::task(
                        &task.name,
                        format!("{field} references unknown task or reserved word: {value:?}"),
                    ));
                }
            }
        }

        // Only attempt graph construction once names/references are sound;
        // otherwise a dangling depends_on could mask as a spurious cycle.
        let graph = if violations.is_empty() {
            match TaskGraph::build(&self.tasks) {
                Ok(graph) => Some(graph),
                Err(cycle_violations) => {
                    violations.extend(cycle_violations);
                    None
                }
            }
        } else {
            None
        };

        if !violations.is_empty() {
            return Err(ConfigError(violations));
        }

        let graph = graph.expect("graph is Some whenever violations is empty");
        let tasks_by_name: HashMap<String, TaskConfig> = self
            .tasks
            .iter()
            .cloned()
            .map(|t| (t.name.clone(), t))
            .collect();
        let order: Vec<String> = self.tasks.iter().map(|t| t.name.clone()).collect();

        Ok(ValidatedConfig {
            settings: self.settings,
            tasks: tasks_by_name,
            order,
            graph,
        })
    }
}

/// Parse a TOML string and validate it in one step.
pub fn load_str(content: &str) -> Result<ValidatedConfig, ConfigError> {
    let config = PrompterConfig::parse_str(content).map_err(|e| {
        ConfigError::single(ConfigViolation::global(format!("TOML parse error: {e}")))
    })?;
    config.validate()
}

/// Read a TOML file from disk, parse, and validate it.
pub fn load_file(path: &Path) -> Result<ValidatedConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::single(ConfigViolation::global(format!(
            "failed to read config file {}: {e}",
            path.display()
        )))
    })?;
    load_str(&content)
}

/// A configuration known to be internally consistent: unique names,
/// reserved words checked, referential integrity checked, acyclic.
///
/// Immutable once built. The core's scheduling components take this type,
/// never the raw `PrompterConfig`.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub settings: RunSettingsConfig,
    tasks: HashMap<String, TaskConfig>,
    order: Vec<String>,
    graph: TaskGraph,
}

impl ValidatedConfig {
    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.get(name)
    }

    /// Task names in declaration order (the order the Sequential Runner
    /// walks in).
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskConfig> {
        self.order.iter().map(move |name| &self.tasks[name])
    }

    /// True when any task declares a dependency. A config with no
    /// dependencies at all is run by the Sequential Runner regardless of
    /// `enable_parallel`, since the Coordinator would just be a
    /// single-width version of the same walk with extra bookkeeping.
    pub fn any_task_has_dependencies(&self) -> bool {
        self.tasks.values().any(|t| !t.depends_on.is_empty())
    }

    /// Whether the Parallel Coordinator should be used for this run.
    pub fn use_parallel_coordinator(&self) -> bool {
        self.settings.enable_parallel && self.any_task_has_dependencies()
    }
}
