// src/exec/ssh.rs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SshSection;
use crate::errors::{DeployError, Result};
use crate::exec::process::{ProcessError, run_process};
use crate::exec::{ExecOutput, RemoteExecutor};
use crate::stage::Host;

/// Exit status the OpenSSH client reserves for its own errors.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Options handed to every `ssh` invocation.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub program: String,
    pub multiplex: bool,
    pub control_path: String,
    pub control_persist: String,
    pub extra_options: Vec<String>,
    pub pty: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self::from(&SshSection::default())
    }
}

impl From<&SshSection> for SshOptions {
    fn from(section: &SshSection) -> Self {
        Self {
            program: "ssh".to_string(),
            multiplex: section.multiplex,
            control_path: "~/.ssh/deploydag-%r@%h:%p".to_string(),
            control_persist: section.control_persist.clone(),
            extra_options: section.options.clone(),
            pty: section.pty,
        }
    }
}

/// Runs commands on remote hosts through the system `ssh` client.
///
/// With multiplexing on, the first command to a host opens a master
/// connection that later commands reuse until `ControlPersist` expires.
/// An ssh exit status of 255 is reported as `ConnectionError`, so a remote
/// command that itself exits with 255 is indistinguishable from a
/// transport failure.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Arguments passed to the ssh program for `command` on `host`.
    pub fn ssh_args(&self, host: &Host, command: &str) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];

        if self.options.multiplex {
            args.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPath={}", self.options.control_path),
                "-o".to_string(),
                format!("ControlPersist={}", self.options.control_persist),
            ]);
        }

        for opt in self.options.extra_options.iter() {
            args.push("-o".to_string());
            args.push(opt.clone());
        }

        if self.options.pty {
            args.push("-tt".to_string());
        }

        if let Some(port) = host.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        args.push(host.destination());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

impl RemoteExecutor for SshExecutor {
    fn execute<'a>(
        &'a self,
        host: &'a Host,
        command: &'a str,
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<ExecOutput>> + Send + 'a>> {
        Box::pin(async move {
            info!(host = %host, cmd = %command, "running remote command");

            let args = self.ssh_args(host, command);
            debug!(program = %self.options.program, ?args, "spawning ssh");

            let mut cmd = Command::new(&self.options.program);
            cmd.args(&args);

            match run_process(cmd, &host.address, timeout).await {
                Ok(out) if out.code == Some(SSH_CONNECTION_FAILURE) => {
                    let message = out
                        .output
                        .lines()
                        .last()
                        .unwrap_or("ssh exited with status 255")
                        .to_string();
                    Err(DeployError::ConnectionError {
                        task: None,
                        host: host.address.clone(),
                        message,
                    })
                }
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
                Err(ProcessError::Spawn(e)) => Err(DeployError::ConnectionError {
                    task: None,
                    host: host.address.clone(),
                    message: format!("spawning {}: {e}", self.options.program),
                }),
                Err(ProcessError::Wait(e)) => Err(DeployError::ConnectionError {
                    task: None,
                    host: host.address.clone(),
                    message: format!("waiting for {}: {e}", self.options.program),
                }),
            }
        })
    }
}
