// src/config/model.rs

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::dag::TaskGraph;
use crate::errors::{DeployError, Result};
use crate::types::{Transport, parse_duration};

/// Lifecycle events used when `[config].flow` is not given.
pub const DEFAULT_FLOW: [&str; 4] = ["starting", "updating", "publishing", "finishing"];

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// application = "apm"
/// default_stage = "staging"
///
/// [vars]
/// gopath = "{{ shared_path }}/gopath"
///
/// [stage.staging]
/// hosts = ["deploy@10.0.0.1"]
///
/// [[task]]
/// name = "compile"
/// after = ["publishing"]
/// commands = ["cd {{ release_path }} && go build"]
/// ```
///
/// Tasks are an array of tables so that declaration order survives
/// deserialization; hooks run their tasks in that order.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// SSH client options from `[ssh]`.
    #[serde(default)]
    pub ssh: SshSection,

    /// Global variables from `[vars]`.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Global environment exports from `[env]`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Stages from `[stage.<name>]`, keyed by stage name.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,

    /// Tasks from `[[task]]`, in declaration order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,

    /// Named recipe variants from `[variant.<name>]`.
    #[serde(default)]
    pub variant: BTreeMap<String, VariantConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (or the
/// loader), so holders can rely on:
/// - every stage having at least one host,
/// - unique task names and an acyclic hook graph,
/// - every variable of every stage resolving without cycles,
/// - parseable durations.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub ssh: SshSection,
    pub vars: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub stage: BTreeMap<String, StageConfig>,
    pub task: Vec<TaskConfig>,
    pub variant: BTreeMap<String, VariantConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            ssh: raw.ssh,
            vars: raw.vars,
            env: raw.env,
            stage: raw.stage,
            task: raw.task,
            variant: raw.variant,
        }
    }

    /// Declared stage names, sorted.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stage.keys().map(|s| s.as_str())
    }

    /// Task graph for the base recipe, or with the named variant applied.
    pub fn task_graph(&self, variant: Option<&str>) -> Result<TaskGraph> {
        let variant = match variant {
            Some(name) => Some(self.variant.get(name).ok_or_else(|| {
                DeployError::ConfigError(format!("unknown variant '{name}'"))
            })?),
            None => None,
        };
        let tasks = merge_variant_tasks(&self.task, variant)?;
        TaskGraph::from_tasks(self.config.flow.clone(), tasks)
    }

    /// Global default command timeout, if configured.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.config
            .command_timeout
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
    }
}

/// Apply a variant's tasks on top of the base task list.
///
/// A variant task replaces the base task with the same name in place;
/// other variant tasks are appended in their declaration order.
pub(crate) fn merge_variant_tasks(
    base: &[TaskConfig],
    variant: Option<&VariantConfig>,
) -> Result<Vec<TaskConfig>> {
    let mut tasks = base.to_vec();
    let Some(variant) = variant else {
        return Ok(tasks);
    };

    let mut seen = HashSet::new();
    for task in variant.task.iter() {
        let name = task.name.trim();
        if !seen.insert(name) {
            return Err(DeployError::DuplicateTaskName(name.to_string()));
        }
        match tasks.iter_mut().find(|t| t.name.trim() == name) {
            Some(slot) => *slot = task.clone(),
            None => tasks.push(task.clone()),
        }
    }

    Ok(tasks)
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Application name; feeds the `application` variable.
    #[serde(default)]
    pub application: String,

    /// Stage used when none is given on the command line.
    #[serde(default)]
    pub default_stage: Option<String>,

    /// Ordered lifecycle events a `deploy` run walks through.
    #[serde(default = "default_flow")]
    pub flow: Vec<String>,

    /// Number of releases to keep; exposed as the `keep_releases` variable.
    #[serde(default = "default_keep_releases")]
    pub keep_releases: u32,

    /// Run a task on all hosts at once (`true`) or one host at a time.
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Default per-command timeout, e.g. `"10m"`. No timeout if unset.
    #[serde(default)]
    pub command_timeout: Option<String>,

    /// Transport used by stages that don't set their own.
    #[serde(default)]
    pub transport: Transport,
}

fn default_flow() -> Vec<String> {
    DEFAULT_FLOW.iter().map(|s| s.to_string()).collect()
}

fn default_keep_releases() -> u32 {
    5
}

fn default_parallel() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            application: String::new(),
            default_stage: None,
            flow: default_flow(),
            keep_releases: default_keep_releases(),
            parallel: default_parallel(),
            command_timeout: None,
            transport: Transport::default(),
        }
    }
}

/// `[ssh]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSection {
    /// Reuse one connection per host through OpenSSH multiplexing.
    #[serde(default = "default_multiplex")]
    pub multiplex: bool,

    /// `ControlPersist` value handed to ssh when multiplexing.
    #[serde(default = "default_control_persist")]
    pub control_persist: String,

    /// Extra `-o` options, e.g. `"StrictHostKeyChecking=accept-new"`.
    #[serde(default)]
    pub options: Vec<String>,

    /// Login user for hosts that don't carry their own.
    #[serde(default)]
    pub user: Option<String>,

    /// Port for hosts that don't carry their own.
    #[serde(default)]
    pub port: Option<u16>,

    /// Force a pseudo-terminal (`ssh -tt`).
    #[serde(default)]
    pub pty: bool,
}

fn default_multiplex() -> bool {
    true
}

fn default_control_persist() -> String {
    "60s".to_string()
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            multiplex: default_multiplex(),
            control_persist: default_control_persist(),
            options: Vec::new(),
            user: None,
            port: None,
            pty: false,
        }
    }
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StageConfig {
    /// Target hosts. Must not be empty.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// Stage variables; override `[vars]` and variant variables.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Stage environment exports; override `[env]`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Overrides `[config].transport` for this stage.
    #[serde(default)]
    pub transport: Option<Transport>,
}

/// A host entry: either `"[user@]address[:port]"` or a table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HostConfig {
    Address(String),
    Detailed(HostTable),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostTable {
    pub address: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Roles this host plays. Empty means the host matches every role.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Unique task name. Other tasks can run `after` it.
    pub name: String,

    /// Human readable description, shown in dry-run output.
    #[serde(default)]
    pub desc: Option<String>,

    /// Commands run in order on every selected host.
    #[serde(default)]
    pub commands: Vec<CommandSpec>,

    /// Events (lifecycle events or task names) this task runs after.
    #[serde(default)]
    pub after: Vec<String>,

    /// Only run on hosts with one of these roles. Empty = all hosts.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Only run in these stages. Empty = every stage.
    #[serde(default)]
    pub stages: Vec<String>,

    /// Task-level environment exports; override stage and global `env`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-command timeout for this task, e.g. `"15m"`.
    #[serde(default)]
    pub timeout: Option<String>,
}

impl TaskConfig {
    /// Effective timeout given the run-wide default.
    pub fn effective_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        self.timeout
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
            .or(default)
    }

    /// Whether this task takes part in the given stage.
    pub fn runs_in_stage(&self, stage: &str) -> bool {
        self.stages.is_empty() || self.stages.iter().any(|s| s == stage)
    }
}

/// A command template.
///
/// - `Shell`: a shell line, interpolated as a whole.
/// - `Args`: an argument list; each argument is interpolated and then
///   shell-quoted, so substituted values stay literal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Args(Vec<String>),
}

/// `[variant.<name>]` section: a named overlay on top of the base recipe.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VariantConfig {
    #[serde(default)]
    pub desc: Option<String>,

    /// Variables layered between `[vars]` and stage variables.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Tasks replacing base tasks of the same name (in place) or appended.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}
