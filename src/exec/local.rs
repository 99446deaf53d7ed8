// src/exec/local.rs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::errors::{DeployError, Result};
use crate::exec::process::{ProcessError, run_process};
use crate::exec::{ExecOutput, RemoteExecutor};
use crate::stage::Host;

/// Runs commands on this machine with the platform shell.
///
/// The host is only a label for logs and errors. Stages with
/// `transport = "local"` use this, and so do tests that need real processes.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteExecutor for LocalExecutor {
    fn execute<'a>(
        &'a self,
        host: &'a Host,
        command: &'a str,
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<ExecOutput>> + Send + 'a>> {
        Box::pin(async move {
            info!(host = %host, cmd = %command, "running local command");

            // Build a shell command appropriate for the platform.
            let cmd = if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(command);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(command);
                c
            };

            match run_process(cmd, &host.address, timeout).await {
                Ok(out) => Ok(ExecOutput {
                    exit_code: out.code.unwrap_or(-1),
                    output: out.output,
                }),
                Err(ProcessError::TimedOut) => Err(DeployError::CommandTimeout {
                    task: None,
                    host: host.address.clone(),
                    command: command.to_string(),
                    timeout: timeout.unwrap_or_default(),
                }),
                Err(ProcessError::Spawn(e)) | Err(ProcessError::Wait(e)) => {
                    Err(DeployError::IoError(e))
                }
            }
        })
    }
}
