// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// Command-line arguments for `deploydag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "deploydag",
    version,
    about = "Run deployment tasks on remote hosts, stage by stage, hook by hook.",
    long_about = None
)]
pub struct CliArgs {
    /// Stage to deploy to (e.g. `production` or `stage=production`).
    ///
    /// Default: `[config].default_stage`.
    #[arg(value_name = "STAGE")]
    pub stage: Option<String>,

    /// What to run: `deploy` (whole lifecycle flow), a lifecycle event, or a
    /// task name.
    #[arg(value_name = "TARGET", default_value = "deploy")]
    pub target: String,

    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Recipe variant to apply (`[variant.<name>]`).
    #[arg(long, value_name = "NAME")]
    pub variant: Option<String>,

    /// Only run on hosts whose address matches this glob. Repeatable.
    #[arg(long = "hosts", value_name = "GLOB")]
    pub hosts: Vec<String>,

    /// Release identifier. Default: current UTC time as `YYYYMMDDHHMMSS`.
    #[arg(long, value_name = "ID")]
    pub release: Option<String>,

    /// Per-command timeout (e.g. `30s`, `10m`); overrides `[config].command_timeout`.
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Write the run record as JSON to this path when the run ends.
    #[arg(long, value_name = "PATH")]
    pub record: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEPLOYDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the plan, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Stage argument with an optional `stage=` prefix removed.
    pub fn stage_name(&self) -> Option<&str> {
        self.stage
            .as_deref()
            .map(|s| s.strip_prefix("stage=").unwrap_or(s))
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
