// src/exec/mod.rs

//! Command execution layer.
//!
//! The runner talks to a [`RemoteExecutor`] instead of spawning processes
//! itself, which keeps the transport swappable: production uses
//! [`SshExecutor`] (or [`LocalExecutor`] for `transport = "local"`), tests
//! provide a scripted fake.
//!
//! - [`ssh`] runs commands through the system `ssh` client.
//! - [`local`] runs commands with `sh -c` on this machine.
//! - [`process`] drives a child process: output streaming and timeouts.
//!
//! Executors never retry. A non-zero exit is returned as data; only
//! transport failures and timeouts are errors.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::Result;
use crate::stage::Host;

pub mod local;
mod process;
pub mod ssh;

pub use local::LocalExecutor;
pub use ssh::{SshExecutor, SshOptions};

/// Outcome of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit status; `-1` if the process was killed by a signal.
    pub exit_code: i32,
    /// Combined stdout/stderr, in the order lines arrived.
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait abstracting how a literal command reaches a host.
///
/// Errors are reserved for `ConnectionError` and `CommandTimeout` (plus IO
/// errors for local spawning); a command that ran and exited non-zero is an
/// `Ok(ExecOutput)`.
pub trait RemoteExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        host: &'a Host,
        command: &'a str,
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<ExecOutput>> + Send + 'a>>;
}
