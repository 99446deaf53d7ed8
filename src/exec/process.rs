// src/exec/process.rs

//! Child process driver shared by the executors.
//!
//! Spawns the prepared command, streams stdout/stderr line by line into
//! `tracing` while also collecting them (in arrival order) into one combined
//! output, and enforces an optional timeout. Output is decoded lossily.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long to wait for output after the child exits. A command that leaves
/// a background process holding the pipes open must not block the run.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Result of a child that ran to completion.
#[derive(Debug, Clone)]
pub(crate) struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub output: String,
}

#[derive(Debug)]
pub(crate) enum ProcessError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    TimedOut,
}

/// Run `cmd` to completion, labelling streamed lines with `host`.
pub(crate) async fn run_process(
    mut cmd: Command,
    host: &str,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(ProcessError::Spawn)?;

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump_lines(
            stdout,
            host.to_string(),
            "stdout",
            line_tx.clone(),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump_lines(
            stderr,
            host.to_string(),
            "stderr",
            line_tx.clone(),
        )));
    }
    drop(line_tx);

    let status = match timeout {
        Some(limit) => tokio::select! {
            status = child.wait() => status.map_err(ProcessError::Wait)?,
            _ = tokio::time::sleep(limit) => {
                warn!(host, ?limit, "command timed out; killing local process");
                if let Err(e) = child.kill().await {
                    warn!(host, error = %e, "failed to kill timed out process");
                }
                return Err(ProcessError::TimedOut);
            }
        },
        None => child.wait().await.map_err(ProcessError::Wait)?,
    };

    // Pipes close once the child exits; let the readers drain what is left.
    for reader in readers {
        match tokio::time::timeout(READER_GRACE, reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(host, error = %e, "output reader task ended abnormally"),
            Err(_) => debug!(host, "output still open after exit; not waiting for it"),
        }
    }

    let mut lines = Vec::new();
    while let Ok(line) = line_rx.try_recv() {
        lines.push(line);
    }

    Ok(ProcessOutput {
        code: status.code(),
        output: lines.join("\n"),
    })
}

async fn pump_lines<R>(reader: R, host: String, stream: &'static str, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    // Raw bytes: an invalid UTF-8 line must not stop draining the pipe.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                info!(target: "deploydag::remote", host = %host, stream, "{}", line);
                let _ = tx.send(line);
            }
            Err(e) => {
                debug!(host = %host, stream, error = %e, "failed to read command output");
                break;
            }
        }
    }
}
