// tests/task_runner.rs

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use deploydag::config::ConfigFile;
use deploydag::dag::{Plan, plan_target};
use deploydag::engine::{CommandOutcome, RunRecord, RunRecorder, RunStatus, TaskRunner};
use deploydag::errors::DeployError;
use deploydag::stage::StageResolver;
use deploydag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use deploydag_test_utils::fake_executor::{FakeEvent, FakeExecutor, FakeResponse};
use deploydag_test_utils::{init_tracing, with_timeout};

fn plan_for(cfg: &ConfigFile, stage: &str, target: &str) -> Plan {
    let stage = StageResolver::new(cfg, "20240101000000")
        .resolve(stage)
        .unwrap();
    let graph = cfg.task_graph(None).unwrap();
    plan_target(&graph, target, &stage, None).unwrap()
}

fn runner(fake: &FakeExecutor) -> TaskRunner {
    let recorder = RunRecorder::new(RunRecord::start("staging", "deploy", None, "20240101000000"));
    TaskRunner::new(Arc::new(fake.clone()), recorder)
}

/// compile (after publishing) -> start (after compile), on two hosts.
fn compile_start_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage("staging", &["h1", "h2"])
        .with_task(
            TaskConfigBuilder::new("compile")
                .after("publishing")
                .command("make build")
                .build(),
        )
        .with_task(
            TaskConfigBuilder::new("start")
                .after("compile")
                .command("./serve")
                .build(),
        )
        .build()
}

fn index_of(events: &[FakeEvent], wanted: impl Fn(&FakeEvent) -> bool) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| wanted(e))
        .map(|(i, _)| i)
        .collect()
}

#[tokio::test]
async fn test_successful_run_executes_every_command_on_every_host() {
    init_tracing();
    let cfg = compile_start_config();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new();
    let runner = runner(&fake);

    with_timeout(runner.run(&plan)).await.unwrap();

    assert_eq!(fake.commands_on("h1"), vec!["make build", "./serve"]);
    assert_eq!(fake.commands_on("h2"), vec!["make build", "./serve"]);

    let record = runner.recorder().snapshot();
    assert_eq!(record.entries.len(), 4);
    assert!(
        record
            .entries
            .iter()
            .all(|e| e.outcome == CommandOutcome::Success)
    );
}

#[tokio::test]
async fn test_failure_on_one_host_aborts_before_next_task() {
    init_tracing();
    let cfg = compile_start_config();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().respond_on("h2", "make", FakeResponse::Exit(1));
    let runner = runner(&fake);

    let result = with_timeout(runner.run(&plan)).await;

    match result {
        Err(DeployError::RemoteCommandFailed {
            task,
            host,
            exit_code,
            command,
        }) => {
            assert_eq!(task, "compile");
            assert_eq!(host, "h2");
            assert_eq!(exit_code, 1);
            assert_eq!(command, "make build");
        }
        other => panic!("Expected RemoteCommandFailed, got: {:?}", other),
    }

    assert!(!fake.ran("./serve"), "start must never run after a failed compile");
    assert_eq!(fake.commands_on("h1"), vec!["make build"]);
}

#[tokio::test]
async fn test_failed_command_stops_remaining_commands_on_host() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1"])
        .with_task(
            TaskConfigBuilder::new("setup")
                .after("updating")
                .command("step-one")
                .command("step-two")
                .command("step-three")
                .build(),
        )
        .build();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().respond("step-two", FakeResponse::Exit(7));
    let runner = runner(&fake);

    let err = with_timeout(runner.run(&plan)).await.unwrap_err();

    assert_eq!(err.exit_code(), 7);
    assert!(err.is_runtime());
    assert_eq!(fake.commands_on("h1"), vec!["step-one", "step-two"]);

    let record = runner.recorder().snapshot();
    let outcomes: Vec<CommandOutcome> = record.entries.iter().map(|e| e.outcome.clone()).collect();
    assert_eq!(
        outcomes,
        vec![CommandOutcome::Success, CommandOutcome::Failed { exit_code: 7 }]
    );
}

#[tokio::test]
async fn test_barrier_waits_for_all_hosts_before_next_task() {
    init_tracing();
    let cfg = compile_start_config();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().delay_on("h2", Duration::from_millis(50));
    let runner = runner(&fake);

    with_timeout(runner.run(&plan)).await.unwrap();

    let events = fake.events();
    let compile_finished = index_of(&events, |e| {
        matches!(e, FakeEvent::Finished { command, .. } if command == "make build")
    });
    let start_started = index_of(&events, |e| {
        matches!(e, FakeEvent::Started { command, .. } if command == "./serve")
    });

    assert_eq!(compile_finished.len(), 2);
    assert_eq!(start_started.len(), 2);
    assert!(
        compile_finished.iter().max() < start_started.iter().min(),
        "every compile must finish before any start begins: {:?}",
        events
    );
}

#[tokio::test]
async fn test_failure_cancels_pending_commands_on_other_hosts() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1", "h2"])
        .with_task(
            TaskConfigBuilder::new("setup")
                .after("updating")
                .command("first")
                .command("second")
                .build(),
        )
        .build();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new()
        .respond_on("h1", "first", FakeResponse::Exit(2))
        .delay_on("h2", Duration::from_millis(100));
    let runner = runner(&fake);

    let result = with_timeout(runner.run(&plan)).await;

    assert!(matches!(
        result,
        Err(DeployError::RemoteCommandFailed { ref host, .. }) if host == "h1"
    ));
    assert!(!fake.ran("second"));
}

#[tokio::test]
async fn test_sequential_mode_runs_hosts_one_after_another() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .parallel(false)
        .with_stage("staging", &["h1", "h2"])
        .with_task(TaskConfigBuilder::new("deploy_code").after("updating").command("sync").build())
        .build();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().delay_on("h1", Duration::from_millis(30));
    let runner = runner(&fake).parallel(cfg.config.parallel);

    with_timeout(runner.run(&plan)).await.unwrap();

    assert_eq!(
        fake.events(),
        vec![
            FakeEvent::Started { host: "h1".into(), command: "sync".into() },
            FakeEvent::Finished { host: "h1".into(), command: "sync".into() },
            FakeEvent::Started { host: "h2".into(), command: "sync".into() },
            FakeEvent::Finished { host: "h2".into(), command: "sync".into() },
        ]
    );
}

#[tokio::test]
async fn test_sequential_mode_stops_at_first_failed_host() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1", "h2"])
        .with_task(TaskConfigBuilder::new("deploy_code").after("updating").command("sync").build())
        .build();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().respond_on("h1", "sync", FakeResponse::Exit(4));
    let runner = runner(&fake).parallel(false);

    let err = with_timeout(runner.run(&plan)).await.unwrap_err();

    assert_eq!(err.exit_code(), 4);
    assert!(fake.commands_on("h2").is_empty());

    let record = runner.recorder().snapshot();
    assert!(record.entries.iter().any(|e| e.host == "h2"
        && e.command == "sync"
        && e.outcome == CommandOutcome::Cancelled));
}

#[tokio::test]
async fn test_timeout_is_reported_distinctly_from_exit_code() {
    init_tracing();
    let cfg = compile_start_config();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().respond_on("h1", "make", FakeResponse::Timeout);
    let runner = runner(&fake);

    let err = with_timeout(runner.run(&plan)).await.unwrap_err();

    assert!(err.to_string().starts_with("Task 'compile': Command timed out"));
    match &err {
        DeployError::CommandTimeout {
            task, host, command, ..
        } => {
            assert_eq!(task.as_deref(), Some("compile"));
            assert_eq!(host, "h1");
            assert_eq!(command, "make build");
        }
        other => panic!("Expected CommandTimeout, got: {:?}", other),
    }

    let record = runner.recorder().snapshot();
    assert!(
        record
            .entries
            .iter()
            .any(|e| e.host == "h1" && e.outcome == CommandOutcome::TimedOut)
    );
    assert!(!fake.ran("./serve"));
}

#[tokio::test]
async fn test_connection_error_aborts_run() {
    init_tracing();
    let cfg = compile_start_config();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().respond_on(
        "h2",
        "make",
        FakeResponse::ConnectionError("Connection refused".to_string()),
    );
    let runner = runner(&fake);

    let err = with_timeout(runner.run(&plan)).await.unwrap_err();

    assert!(matches!(
        err,
        DeployError::ConnectionError { ref task, ref host, .. }
            if host == "h2" && task.as_deref() == Some("compile")
    ));
    assert_eq!(err.exit_code(), 1);
    let record = runner.recorder().snapshot();
    assert!(record.entries.iter().any(|e| e.outcome
        == CommandOutcome::ConnectionFailed {
            message: "Connection refused".to_string()
        }));
}

#[tokio::test]
async fn test_shutdown_before_run_is_cancelled_without_side_effects() {
    init_tracing();
    let cfg = compile_start_config();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new();
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let runner = runner(&fake).with_shutdown(shutdown);

    let result = with_timeout(runner.run(&plan)).await;

    match result {
        Err(DeployError::Cancelled(task)) => assert_eq!(task, "compile"),
        other => panic!("Expected Cancelled, got: {:?}", other),
    }
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_step_without_matching_hosts_is_skipped() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_role_host("staging", "web1", &["web"])
        .with_task(
            TaskConfigBuilder::new("migrate")
                .after("updating")
                .role("db")
                .command("migrate")
                .build(),
        )
        .with_task(TaskConfigBuilder::new("restart").after("publishing").command("restart").build())
        .build();
    let plan = plan_for(&cfg, "staging", "deploy");
    assert!(plan.step("migrate").unwrap().hosts.is_empty());

    let fake = FakeExecutor::new();
    let runner = runner(&fake);
    with_timeout(runner.run(&plan)).await.unwrap();

    assert_eq!(fake.commands_on("web1"), vec!["restart"]);
}

#[tokio::test]
async fn test_each_task_runs_once_per_run() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1"])
        .with_task(
            TaskConfigBuilder::new("notify")
                .after("starting")
                .after("updating")
                .after("finishing")
                .command("notify")
                .build(),
        )
        .build();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new();

    with_timeout(runner(&fake).run(&plan)).await.unwrap();

    assert_eq!(fake.commands_on("h1"), vec!["notify"]);
}

#[tokio::test]
async fn test_run_record_serializes_outcomes() {
    init_tracing();
    let cfg = compile_start_config();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new().respond_on("h1", "./serve", FakeResponse::Exit(3));
    let runner = runner(&fake);

    let result = with_timeout(runner.run(&plan)).await;
    runner.recorder().finish(result.is_ok());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records").join("run.json");
    runner.recorder().save(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["stage"], "staging");
    assert_eq!(json["release"], "20240101000000");
    assert!(json["finished_at"].is_string());

    let entries = json["entries"].as_array().unwrap();
    let failed = entries
        .iter()
        .find(|e| e["outcome"] == "failed")
        .expect("failed entry");
    assert_eq!(failed["host"], "h1");
    assert_eq!(failed["task"], "start");
    assert_eq!(failed["exit_code"], 3);

    assert_eq!(runner.recorder().snapshot().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_run_hook_runs_event_and_its_chain() {
    init_tracing();
    let cfg = compile_start_config();
    let stage = StageResolver::new(&cfg, "20240101000000")
        .resolve("staging")
        .unwrap();
    let graph = cfg.task_graph(None).unwrap();
    let fake = FakeExecutor::new();

    with_timeout(runner(&fake).run_hook(&graph, "publishing", &stage, None))
        .await
        .unwrap();

    assert_eq!(fake.commands_on("h1"), vec!["make build", "./serve"]);

    let fake = FakeExecutor::new();
    with_timeout(runner(&fake).run_hook(&graph, "updating", &stage, None))
        .await
        .unwrap();
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_tasks_of_one_hook_run_one_after_another_across_hosts() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1", "h2", "h3"])
        .with_task(TaskConfigBuilder::new("A").after("updating").command("task-a").build())
        .with_task(TaskConfigBuilder::new("B").after("updating").command("task-b").build())
        .build();
    let plan = plan_for(&cfg, "staging", "updating");
    let fake = FakeExecutor::new()
        .delay_on("h1", Duration::from_millis(40))
        .delay_on("h3", Duration::from_millis(20));

    with_timeout(runner(&fake).run(&plan)).await.unwrap();

    let events = fake.events();
    let a_finished = index_of(&events, |e| {
        matches!(e, FakeEvent::Finished { command, .. } if command == "task-a")
    });
    let b_started = index_of(&events, |e| {
        matches!(e, FakeEvent::Started { command, .. } if command == "task-b")
    });
    assert_eq!(a_finished.len(), 3);
    assert_eq!(b_started.len(), 3);
    assert!(a_finished.iter().max() < b_started.iter().min());
}

#[tokio::test]
async fn test_every_skipped_command_is_recorded_as_cancelled() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1", "h2"])
        .with_task(
            TaskConfigBuilder::new("setup")
                .after("updating")
                .command("first")
                .command("second")
                .command("third")
                .build(),
        )
        .build();
    let plan = plan_for(&cfg, "staging", "deploy");
    let fake = FakeExecutor::new()
        .respond_on("h1", "first", FakeResponse::Exit(2))
        .delay_on("h2", Duration::from_millis(100));
    let runner = runner(&fake);

    with_timeout(runner.run(&plan)).await.unwrap_err();

    let record = runner.recorder().snapshot();
    let cancelled = |host: &str| -> Vec<String> {
        record
            .entries
            .iter()
            .filter(|e| e.host == host && e.outcome == CommandOutcome::Cancelled)
            .map(|e| e.command.clone())
            .collect()
    };
    assert_eq!(cancelled("h1"), vec!["second", "third"]);
    // h2 finished its in-flight "first" before noticing the failure.
    assert_eq!(cancelled("h2"), vec!["second", "third"]);
    assert_eq!(record.entries.len(), 6);
}
