// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Variants split into two groups:
//! - configuration-shape errors (`ConfigError`, `UnknownStage`,
//!   `DuplicateTaskName`, `CyclicTaskDependency`, `CyclicVariableReference`,
//!   `UnknownVariable`), raised before any remote command runs;
//! - runtime errors (`ConnectionError`, `CommandTimeout`,
//!   `RemoteCommandFailed`, `Cancelled`), raised at the point of failure.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown stage: '{0}'")]
    UnknownStage(String),

    #[error("Duplicate task name: '{0}'")]
    DuplicateTaskName(String),

    #[error("Cyclic task dependency: {0}")]
    CyclicTaskDependency(String),

    #[error("Cyclic variable reference: {}", .0.join(" -> "))]
    CyclicVariableReference(Vec<String>),

    #[error("Unknown variable '{name}' referenced in '{template}'")]
    UnknownVariable { name: String, template: String },

    /// `task` is filled in by the runner; executors leave it `None`.
    #[error("{}Connection to host '{host}' failed: {message}", task_prefix(.task))]
    ConnectionError {
        task: Option<String>,
        host: String,
        message: String,
    },

    #[error("{}Command timed out after {timeout:?} on host '{host}': {command}", task_prefix(.task))]
    CommandTimeout {
        task: Option<String>,
        host: String,
        command: String,
        timeout: Duration,
    },

    #[error("Task '{task}' failed on host '{host}' with exit code {exit_code}: {command}")]
    RemoteCommandFailed {
        task: String,
        host: String,
        exit_code: i32,
        command: String,
    },

    #[error("Run cancelled during task '{0}'")]
    Cancelled(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    /// Whether this error was detected before any remote side effects.
    pub fn is_config_shape(&self) -> bool {
        matches!(
            self,
            DeployError::ConfigError(_)
                | DeployError::UnknownStage(_)
                | DeployError::DuplicateTaskName(_)
                | DeployError::CyclicTaskDependency(_)
                | DeployError::CyclicVariableReference(_)
                | DeployError::UnknownVariable { .. }
                | DeployError::TomlError(_)
        )
    }

    /// Whether this error stopped a run that had already started executing.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            DeployError::ConnectionError { .. }
                | DeployError::CommandTimeout { .. }
                | DeployError::RemoteCommandFailed { .. }
                | DeployError::Cancelled(_)
        )
    }

    /// Process exit code for this error.
    ///
    /// A failed remote command propagates its own exit code when it fits in
    /// the 1..=255 range; everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::RemoteCommandFailed { exit_code, .. } if (1..=255).contains(exit_code) => {
                *exit_code
            }
            _ => 1,
        }
    }

    /// Attach `task` to a connection or timeout error raised by an executor.
    /// Other errors, and errors that already name a task, are returned as is.
    pub fn in_task(mut self, name: &str) -> Self {
        if let DeployError::ConnectionError { task, .. } | DeployError::CommandTimeout { task, .. } =
            &mut self
        {
            task.get_or_insert_with(|| name.to_string());
        }
        self
    }
}

fn task_prefix(task: &Option<String>) -> String {
    match task {
        Some(name) => format!("Task '{name}': "),
        None => String::new(),
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DeployError>;
