// src/engine/record.rs

//! Per-run record of what ran where, and how it ended.
//!
//! Host workers write to the record concurrently through [`RunRecorder`].
//! The record is dropped at the end of the run unless `--record` asks for
//! it to be written out as JSON.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::Result;

/// New release identifier: the current UTC time as `YYYYMMDDHHMMSS`.
pub fn new_release_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// How a single command ended on a single host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Success,
    Failed { exit_code: i32 },
    TimedOut,
    ConnectionFailed { message: String },
    /// Not started because another host (or Ctrl-C) aborted the task.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordEntry {
    pub task: String,
    pub host: String,
    pub command: String,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub stage: String,
    pub target: String,
    pub variant: Option<String>,
    pub release: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub entries: Vec<RecordEntry>,
}

impl RunRecord {
    pub fn start(
        stage: impl Into<String>,
        target: impl Into<String>,
        variant: Option<String>,
        release: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            target: target.into(),
            variant,
            release: release.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            entries: Vec::new(),
        }
    }
}

/// Shared, concurrency-safe handle to a [`RunRecord`].
#[derive(Debug, Clone)]
pub struct RunRecorder {
    inner: Arc<Mutex<RunRecord>>,
}

impl RunRecorder {
    pub fn new(record: RunRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    pub fn push(&self, entry: RecordEntry) {
        // Poisoned only if a worker panicked mid-push; entries stay valid.
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.entries.push(entry);
    }

    pub fn finish(&self, succeeded: bool) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.finished_at = Some(Utc::now());
        guard.status = if succeeded {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
    }

    /// Copy of the record as it stands.
    pub fn snapshot(&self) -> RunRecord {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Write the record as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.snapshot()).map_err(anyhow::Error::from)?;
        fs::write(path, json)?;
        Ok(())
    }
}
