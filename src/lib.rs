// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod stage;
pub mod template;
pub mod types;
pub mod vars;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{Plan, plan_target};
use crate::engine::{RunRecord, RunRecorder, TaskRunner, new_release_id};
use crate::errors::{DeployError, Result};
use crate::exec::{LocalExecutor, RemoteExecutor, SshExecutor, SshOptions};
use crate::stage::{Stage, StageResolver};
use crate::types::{Transport, parse_duration};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - stage resolution (variant, host filter, release id)
/// - planning (all commands rendered up front)
/// - the executor for the stage's transport
/// - the runner, Ctrl-C handling and the optional run record
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let stage_name = match args.stage_name() {
        Some(name) => name.to_string(),
        None => cfg.config.default_stage.clone().ok_or_else(|| {
            DeployError::ConfigError(
                "no stage given and [config].default_stage is not set".to_string(),
            )
        })?,
    };

    let release = args.release.clone().unwrap_or_else(new_release_id);
    let variant = args.variant.as_deref();

    let stage = StageResolver::new(&cfg, release.clone())
        .with_variant(variant)?
        .with_host_filter(&args.hosts)?
        .resolve(&stage_name)?;

    let timeout = match args.timeout.as_deref() {
        Some(s) => Some(
            parse_duration(s).map_err(|e| DeployError::ConfigError(format!("--timeout: {e}")))?,
        ),
        None => cfg.command_timeout(),
    };

    let graph = cfg.task_graph(variant)?;
    let plan = plan_target(&graph, &args.target, &stage, timeout)?;

    if args.dry_run {
        print_dry_run(&cfg, &stage, &plan, &release);
        return Ok(());
    }

    if plan.is_empty() {
        warn!(target = %args.target, stage = %stage.name, "nothing to run");
        return Ok(());
    }

    let executor = executor_for(&cfg, &stage);
    let recorder = RunRecorder::new(RunRecord::start(
        &stage.name,
        &args.target,
        args.variant.clone(),
        &release,
    ));

    // Ctrl-C → stop starting new commands; in-flight ones finish.
    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl+C received; aborting after in-flight commands finish");
            token.cancel();
        });
    }

    info!(stage = %stage.name, release = %release, target = %args.target, "deploying");

    let runner = TaskRunner::new(executor, recorder.clone())
        .parallel(cfg.config.parallel)
        .with_shutdown(shutdown);
    let result = runner.run(&plan).await;

    recorder.finish(result.is_ok());
    if let Some(path) = args.record.as_deref() {
        match recorder.save(Path::new(path)) {
            Ok(()) => info!(path, "run record written"),
            Err(e) => warn!(path, error = %e, "failed to write run record"),
        }
    }

    result
}

fn executor_for(cfg: &ConfigFile, stage: &Stage) -> Arc<dyn RemoteExecutor> {
    match stage.transport {
        Transport::Ssh => Arc::new(SshExecutor::new(SshOptions::from(&cfg.ssh))),
        Transport::Local => Arc::new(LocalExecutor::new()),
    }
}

/// Dry-run output: stage, hosts, variables and every rendered command.
fn print_dry_run(cfg: &ConfigFile, stage: &Stage, plan: &Plan, release: &str) {
    println!("deploydag dry-run");
    println!("  application = {}", cfg.config.application);
    println!("  stage = {}", stage.name);
    println!("  target = {}", plan.target);
    println!("  release = {release}");
    println!("  transport = {:?}", stage.transport);
    println!("  parallel = {}", cfg.config.parallel);
    println!();

    println!("hosts ({}):", stage.hosts.len());
    for host in stage.hosts.iter() {
        if host.roles.is_empty() {
            println!("  - {}", host.destination());
        } else {
            println!("  - {} roles={:?}", host.destination(), host.roles);
        }
    }
    println!();

    println!("vars:");
    for key in stage.vars.keys() {
        match stage.vars.resolve(key) {
            Ok(value) => println!("  {key} = {value}"),
            Err(e) => println!("  {key} = <error: {e}>"),
        }
    }
    println!();

    println!("steps ({}):", plan.steps.len());
    for step in plan.steps.iter() {
        match step.event.as_deref() {
            Some(event) => println!("  - {} (after {event})", step.task),
            None => println!("  - {}", step.task),
        }
        if let Some(desc) = step.desc.as_deref() {
            println!("      desc: {desc}");
        }
        let hosts: Vec<&str> = step.hosts.iter().map(|h| h.address.as_str()).collect();
        println!("      hosts: {:?}", hosts);
        if let Some(timeout) = step.timeout {
            println!("      timeout: {timeout:?}");
        }
        for cmd in step.commands.iter() {
            println!("      $ {cmd}");
        }
    }

    debug!("dry-run complete (no execution)");
}
