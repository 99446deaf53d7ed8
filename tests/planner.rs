// tests/planner.rs

use std::time::Duration;

use deploydag::config::{ConfigFile, load_and_validate};
use deploydag::dag::{Plan, TaskGraph, plan_target};
use deploydag::errors::DeployError;
use deploydag::stage::StageResolver;
use deploydag::vars::has_placeholders;
use deploydag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};

const RELEASE: &str = "20240101000000";

fn apm_config() -> ConfigFile {
    load_and_validate(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/apm.toml"))
        .expect("demo recipe should load")
}

fn plan(cfg: &ConfigFile, variant: Option<&str>, stage: &str, target: &str) -> Plan {
    let stage = StageResolver::new(cfg, RELEASE)
        .with_variant(variant)
        .unwrap()
        .resolve(stage)
        .unwrap();
    let graph = cfg.task_graph(variant).unwrap();
    plan_target(&graph, target, &stage, cfg.command_timeout()).unwrap()
}

#[test]
fn test_apm_deploy_runs_checkout_link_compile_start_in_order() {
    let cfg = apm_config();
    let plan = plan(&cfg, None, "staging", "deploy");

    assert_eq!(
        plan.task_names(),
        vec!["checkout", "link_repo", "compile", "start"]
    );
    let events: Vec<Option<&str>> = plan.steps.iter().map(|s| s.event.as_deref()).collect();
    assert_eq!(
        events,
        vec![
            Some("updating"),
            Some("updating"),
            Some("publishing"),
            Some("compile")
        ]
    );

    let checkout = plan.step("checkout").unwrap();
    assert_eq!(
        checkout.commands,
        vec![
            "git clone --depth 1 --branch master 'https://github.com/topfreegames/apm.git' \
             /var/apps/apm/staging/releases/20240101000000"
                .to_string()
        ]
    );

    for step in plan.steps.iter() {
        assert_eq!(step.hosts.len(), 1);
        assert_eq!(step.timeout, Some(Duration::from_secs(15 * 60)));
        for cmd in step.commands.iter() {
            assert!(!has_placeholders(cmd), "unrendered placeholder in {cmd}");
        }
    }
}

#[test]
fn test_apm_commands_are_rendered_for_the_stage() {
    let cfg = apm_config();
    let plan = plan(&cfg, None, "staging", "deploy");

    let link = plan.step("link_repo").unwrap();
    assert_eq!(link.commands.len(), 3);
    assert_eq!(
        link.commands[2],
        "ln -snf /var/apps/apm/staging/releases/20240101000000 \
         /var/apps/apm/staging/shared/gopath/src/github.com/topfreegames/apm"
    );

    let compile = plan.step("compile").unwrap();
    assert_eq!(
        compile.commands,
        vec![
            "export GOBIN=\"/usr/local/go/bin\" GOPATH=\"/var/apps/apm/staging/shared/gopath\" \
             PATH=\"/usr/local/go/bin:$PATH\" && \
             cd /var/apps/apm/staging/shared/gopath/src/github.com/topfreegames/apm && \
             go get -u -f all || true && go get && go build"
                .to_string()
        ]
    );

    let start = plan.step("start").unwrap();
    assert!(start.commands[0].ends_with(
        "./apm serve --config-file=\"/var/apps/apm/staging/shared/apm-config/config.toml\""
    ));
}

#[test]
fn test_variant_replaces_task_in_place() {
    let cfg = apm_config();
    let plan = plan(&cfg, Some("goget_hack"), "production", "deploy");

    assert_eq!(
        plan.task_names(),
        vec!["checkout", "link_repo", "compile", "start"]
    );
    let link = plan.step("link_repo").unwrap();
    assert_eq!(link.commands.len(), 6);
    assert!(link.commands[5].contains("git clone git@git.topfreegames.com:topfreegames/aguia.git"));
    assert!(link.commands[5].contains("$GOPATH/src/git.topfreegames.com/topfreegames"));
    assert_eq!(link.hosts.len(), 2);
}

#[test]
fn test_task_target_runs_task_then_chained_hook() {
    let cfg = apm_config();
    let plan = plan(&cfg, None, "staging", "compile");

    assert_eq!(plan.task_names(), vec!["compile", "start"]);
    assert_eq!(plan.steps[0].event, None);
    assert_eq!(plan.steps[1].event.as_deref(), Some("compile"));
}

#[test]
fn test_event_target_fires_only_that_event() {
    let cfg = apm_config();
    assert_eq!(
        plan(&cfg, None, "staging", "publishing").task_names(),
        vec!["compile", "start"]
    );
    assert_eq!(
        plan(&cfg, None, "staging", "updating").task_names(),
        vec!["checkout", "link_repo"]
    );
    assert!(plan(&cfg, None, "staging", "finishing").is_empty());
}

#[test]
fn test_unknown_target_is_config_error() {
    let cfg = apm_config();
    let stage = StageResolver::new(&cfg, RELEASE).resolve("staging").unwrap();
    let graph = cfg.task_graph(None).unwrap();

    match plan_target(&graph, "rollback", &stage, None) {
        Err(DeployError::ConfigError(msg)) => assert!(msg.contains("rollback")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn test_hooks_keep_declaration_order_depth_first() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1"])
        .with_task(TaskConfigBuilder::new("a").after("updating").command("a").build())
        .with_task(TaskConfigBuilder::new("b").after("updating").command("b").build())
        .with_task(TaskConfigBuilder::new("c").after("a").command("c").build())
        .with_task(TaskConfigBuilder::new("d").after("starting").command("d").build())
        .build();

    let plan = plan(&cfg, None, "staging", "deploy");
    assert_eq!(plan.task_names(), vec!["d", "a", "c", "b"]);
}

#[test]
fn test_task_bound_to_several_events_runs_once() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1"])
        .with_task(
            TaskConfigBuilder::new("notify")
                .after("starting")
                .after("finishing")
                .command("echo notify")
                .build(),
        )
        .with_task(TaskConfigBuilder::new("build").after("updating").command("make").build())
        .with_task(TaskConfigBuilder::new("check").after("build").after("notify").command("check").build())
        .build();

    let plan = plan(&cfg, None, "staging", "deploy");
    assert_eq!(plan.task_names(), vec!["notify", "check", "build"]);
    assert_eq!(plan.step("notify").unwrap().event.as_deref(), Some("starting"));
    assert_eq!(plan.step("check").unwrap().event.as_deref(), Some("notify"));
}

#[test]
fn test_stage_filter_drops_task_but_keeps_its_chain() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1"])
        .with_stage("production", &["h2"])
        .with_task(
            TaskConfigBuilder::new("migrate")
                .after("updating")
                .stage("production")
                .command("migrate")
                .build(),
        )
        .with_task(TaskConfigBuilder::new("restart").after("migrate").command("restart").build())
        .build();

    assert_eq!(
        plan(&cfg, None, "staging", "deploy").task_names(),
        vec!["restart"]
    );
    assert_eq!(
        plan(&cfg, None, "production", "deploy").task_names(),
        vec!["migrate", "restart"]
    );
}

#[test]
fn test_role_filter_selects_hosts() {
    let cfg = ConfigFileBuilder::new()
        .with_role_host("production", "web1", &["web"])
        .with_role_host("production", "db1", &["db"])
        .with_stage("production", &["util1"])
        .with_task(
            TaskConfigBuilder::new("migrate")
                .after("updating")
                .role("db")
                .command("migrate")
                .build(),
        )
        .with_task(TaskConfigBuilder::new("restart").after("publishing").command("restart").build())
        .build();

    let plan = plan(&cfg, None, "production", "deploy");
    let hosts = |task: &str| -> Vec<String> {
        plan.step(task)
            .unwrap()
            .hosts
            .iter()
            .map(|h| h.address.clone())
            .collect()
    };
    assert_eq!(hosts("migrate"), vec!["db1", "util1"]);
    assert_eq!(hosts("restart"), vec!["web1", "db1", "util1"]);
}

#[test]
fn test_task_timeout_overrides_default() {
    let cfg = ConfigFileBuilder::new()
        .command_timeout("1m")
        .with_stage("staging", &["h1"])
        .with_task(TaskConfigBuilder::new("slow").after("updating").timeout("20m").command("slow").build())
        .with_task(TaskConfigBuilder::new("fast").after("updating").command("fast").build())
        .build();

    let plan = plan(&cfg, None, "staging", "deploy");
    assert_eq!(plan.step("slow").unwrap().timeout, Some(Duration::from_secs(1200)));
    assert_eq!(plan.step("fast").unwrap().timeout, Some(Duration::from_secs(60)));
}

#[test]
fn test_custom_flow_drives_deploy() {
    let cfg = ConfigFileBuilder::new()
        .flow(&["build", "ship"])
        .with_stage("staging", &["h1"])
        .with_task(TaskConfigBuilder::new("upload").after("ship").command("upload").build())
        .with_task(TaskConfigBuilder::new("compile").after("build").command("make").build())
        .build();

    assert_eq!(
        plan(&cfg, None, "staging", "deploy").task_names(),
        vec!["compile", "upload"]
    );
}

#[test]
fn test_graph_register_rejects_duplicates() {
    let mut graph = TaskGraph::new(vec!["updating".to_string()]);
    graph
        .register(TaskConfigBuilder::new("a").after("updating").build())
        .unwrap();

    match graph.register(TaskConfigBuilder::new(" a ").after("updating").build()) {
        Err(DeployError::DuplicateTaskName(name)) => assert_eq!(name, "a"),
        other => panic!("Expected DuplicateTaskName, got: {:?}", other),
    }
    assert_eq!(graph.len(), 1);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_graph_validate_detects_longer_cycles() {
    let mut graph = TaskGraph::new(vec!["updating".to_string()]);
    graph.register(TaskConfigBuilder::new("a").after("c").build()).unwrap();
    graph.register(TaskConfigBuilder::new("b").after("a").build()).unwrap();
    graph.register(TaskConfigBuilder::new("c").after("b").build()).unwrap();

    assert!(matches!(
        graph.validate(),
        Err(DeployError::CyclicTaskDependency(_))
    ));
}

#[test]
fn test_task_without_hooks_only_runs_as_target() {
    let cfg = ConfigFileBuilder::new()
        .with_stage("staging", &["h1"])
        .with_task(TaskConfigBuilder::new("console").command("echo hi").build())
        .build();

    assert!(plan(&cfg, None, "staging", "deploy").is_empty());
    assert_eq!(
        plan(&cfg, None, "staging", "console").task_names(),
        vec!["console"]
    );
}
