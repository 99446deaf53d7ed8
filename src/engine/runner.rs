// src/engine/runner.rs

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{Plan, PlannedStep, TaskGraph, plan_target};
use crate::errors::{DeployError, Result};
use crate::exec::RemoteExecutor;
use crate::stage::{Host, Stage};

use super::record::{CommandOutcome, RecordEntry, RunRecorder};

/// Executes a [`Plan`] against a [`RemoteExecutor`].
///
/// Per step:
/// - one worker per host (all at once, or one after another when
///   `parallel` is off);
/// - commands on one host run strictly in order, each must exit 0 before
///   the next starts;
/// - the step ends only when every worker has finished (barrier), and the
///   next step starts only if none failed.
///
/// The first failure cancels the step's token: workers on other hosts let
/// their in-flight command finish but start nothing new. Nothing is retried
/// or rolled back.
pub struct TaskRunner {
    executor: Arc<dyn RemoteExecutor>,
    recorder: RunRecorder,
    parallel: bool,
    shutdown: CancellationToken,
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    pub fn new(executor: Arc<dyn RemoteExecutor>, recorder: RunRecorder) -> Self {
        Self {
            executor,
            recorder,
            parallel: true,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Token that aborts the run when cancelled (wired to Ctrl-C).
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// Plan `event` for `stage` and run it.
    ///
    /// The whole hook is rendered before the first command is sent, so a
    /// variable error leaves every host untouched.
    pub async fn run_hook(
        &self,
        graph: &TaskGraph,
        event: &str,
        stage: &Stage,
        default_timeout: Option<Duration>,
    ) -> Result<()> {
        let plan = plan_target(graph, event, stage, default_timeout)?;
        self.run(&plan).await
    }

    /// Run every step of `plan` in order. Stops at the first failure.
    pub async fn run(&self, plan: &Plan) -> Result<()> {
        info!(
            stage = %plan.stage,
            target = %plan.target,
            steps = plan.steps.len(),
            "starting run"
        );

        for step in plan.steps.iter() {
            if self.shutdown.is_cancelled() {
                return Err(DeployError::Cancelled(step.task.clone()));
            }

            if step.hosts.is_empty() {
                warn!(task = %step.task, "no host matches the task's roles; skipping");
                continue;
            }

            info!(
                task = %step.task,
                event = step.event.as_deref().unwrap_or("<target>"),
                hosts = step.hosts.len(),
                commands = step.commands.len(),
                "running task"
            );

            self.run_step(step).await?;

            info!(task = %step.task, "task finished on all hosts");
        }

        info!(stage = %plan.stage, target = %plan.target, "run finished");
        Ok(())
    }

    async fn run_step(&self, step: &PlannedStep) -> Result<()> {
        let cancel = self.shutdown.child_token();
        let job = Arc::new(StepJob {
            task: step.task.clone(),
            commands: step.commands.clone(),
            timeout: step.timeout,
        });

        let mut failure: Option<DeployError> = None;

        if self.parallel {
            let mut workers = JoinSet::new();
            for host in step.hosts.iter().cloned() {
                let worker = self.worker(&job, &cancel);
                workers.spawn(async move { worker.run(host).await });
            }

            // Barrier: wait for every host, keeping the first failure.
            while let Some(joined) = workers.join_next().await {
                let err = match joined {
                    Ok(Ok(())) => continue,
                    Ok(Err(err)) => err,
                    Err(join_err) => DeployError::Other(anyhow!(
                        "host worker for task '{}' panicked: {join_err}",
                        step.task
                    )),
                };
                cancel.cancel();
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        } else {
            // Hosts after a failure still get a worker; it only records its
            // commands as cancelled.
            for host in step.hosts.iter().cloned() {
                if let Err(err) = self.worker(&job, &cancel).run(host).await {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if self.shutdown.is_cancelled() {
            return Err(DeployError::Cancelled(step.task.clone()));
        }
        Ok(())
    }

    fn worker(&self, job: &Arc<StepJob>, cancel: &CancellationToken) -> HostWorker {
        HostWorker {
            executor: Arc::clone(&self.executor),
            recorder: self.recorder.clone(),
            job: Arc::clone(job),
            cancel: cancel.clone(),
        }
    }
}

/// Immutable per-step data shared by the host workers.
#[derive(Debug)]
struct StepJob {
    task: String,
    commands: Vec<String>,
    timeout: Option<Duration>,
}

struct HostWorker {
    executor: Arc<dyn RemoteExecutor>,
    recorder: RunRecorder,
    job: Arc<StepJob>,
    cancel: CancellationToken,
}

impl HostWorker {
    async fn run(self, host: Host) -> Result<()> {
        for (idx, command) in self.job.commands.iter().enumerate() {
            if self.cancel.is_cancelled() {
                debug!(
                    task = %self.job.task,
                    host = %host,
                    skipped = self.job.commands.len() - idx,
                    "task cancelled; not starting remaining commands"
                );
                self.record_skipped(&host, idx);
                return Ok(());
            }

            let started = Instant::now();
            let result = self
                .executor
                .execute(&host, command, self.job.timeout)
                .await;
            let elapsed = started.elapsed();

            match result {
                Ok(out) if out.success() => {
                    self.record(&host, command, CommandOutcome::Success, elapsed);
                }
                Ok(out) => {
                    error!(
                        task = %self.job.task,
                        host = %host,
                        exit_code = out.exit_code,
                        cmd = %command,
                        "remote command failed"
                    );
                    self.record(
                        &host,
                        command,
                        CommandOutcome::Failed {
                            exit_code: out.exit_code,
                        },
                        elapsed,
                    );
                    self.record_skipped(&host, idx + 1);
                    self.cancel.cancel();
                    return Err(DeployError::RemoteCommandFailed {
                        task: self.job.task.clone(),
                        host: host.address.clone(),
                        exit_code: out.exit_code,
                        command: command.clone(),
                    });
                }
                Err(err) => {
                    error!(
                        task = %self.job.task,
                        host = %host,
                        error = %err,
                        "command did not complete"
                    );
                    let outcome = match &err {
                        DeployError::CommandTimeout { .. } => CommandOutcome::TimedOut,
                        DeployError::ConnectionError { message, .. } => {
                            CommandOutcome::ConnectionFailed {
                                message: message.clone(),
                            }
                        }
                        other => CommandOutcome::ConnectionFailed {
                            message: other.to_string(),
                        },
                    };
                    self.record(&host, command, outcome, elapsed);
                    self.record_skipped(&host, idx + 1);
                    self.cancel.cancel();
                    return Err(err.in_task(&self.job.task));
                }
            }
        }
        Ok(())
    }

    /// Record every command from `from` on as cancelled.
    fn record_skipped(&self, host: &Host, from: usize) {
        for command in self.job.commands.iter().skip(from) {
            self.record(host, command, CommandOutcome::Cancelled, Duration::ZERO);
        }
    }

    fn record(&self, host: &Host, command: &str, outcome: CommandOutcome, elapsed: Duration) {
        self.recorder.push(RecordEntry {
            task: self.job.task.clone(),
            host: host.address.clone(),
            command: command.to_string(),
            outcome,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
    }
}
