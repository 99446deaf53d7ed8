// src/dag/plan.rs

//! Pure planner: expands a target into ordered, fully rendered steps.
//!
//! Nothing here touches the network. Every command of every step is
//! rendered while planning, so unknown or cyclic variables are reported
//! before the first remote command runs.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tracing::debug;

use crate::config::TaskConfig;
use crate::dag::graph::{DEPLOY_TARGET, TaskGraph};
use crate::errors::{DeployError, Result};
use crate::stage::{Host, Stage};
use crate::template::render_command;

/// One task, ready to run on its hosts.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    /// Event that fired this task; `None` when the task was the target.
    pub event: Option<String>,
    pub task: String,
    pub desc: Option<String>,
    /// Stage hosts that pass the task's role filter. May be empty.
    pub hosts: Vec<Host>,
    /// Literal commands, in execution order.
    pub commands: Vec<String>,
    pub timeout: Option<Duration>,
}

/// Ordered steps for one run. Each task appears at most once.
#[derive(Debug, Clone)]
pub struct Plan {
    pub stage: String,
    pub target: String,
    pub steps: Vec<PlannedStep>,
}

impl Plan {
    pub fn task_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.task.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, task: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.task == task)
    }
}

/// Build the plan for `target` in `stage`.
///
/// `target` is one of:
/// - `deploy`: fire every lifecycle event of the flow, in order;
/// - a lifecycle event: fire just that event;
/// - a task name: run that task, then whatever runs after it.
///
/// Firing an event runs the tasks bound to it in declaration order; after
/// each task the tasks bound to that task's name follow (depth first).
pub fn plan_target(
    graph: &TaskGraph,
    target: &str,
    stage: &Stage,
    default_timeout: Option<Duration>,
) -> Result<Plan> {
    let mut planner = Planner {
        graph,
        stage,
        default_timeout,
        visited: HashSet::new(),
        steps: Vec::new(),
    };

    if target == DEPLOY_TARGET {
        for event in graph.flow() {
            planner.fire(event)?;
        }
    } else if graph.is_flow_event(target) {
        planner.fire(target)?;
    } else if let Some(task) = graph.task(target) {
        planner.visited.insert(task.name.clone());
        planner.schedule(None, task)?;
    } else {
        return Err(DeployError::ConfigError(format!(
            "unknown target '{target}' (expected '{DEPLOY_TARGET}', a lifecycle event or a task name)"
        )));
    }

    debug!(
        stage = %stage.name,
        target,
        steps = planner.steps.len(),
        "planned run"
    );

    Ok(Plan {
        stage: stage.name.clone(),
        target: target.to_string(),
        steps: planner.steps,
    })
}

struct Planner<'a> {
    graph: &'a TaskGraph,
    stage: &'a Stage,
    default_timeout: Option<Duration>,
    visited: HashSet<String>,
    steps: Vec<PlannedStep>,
}

impl<'a> Planner<'a> {
    fn fire(&mut self, event: &str) -> Result<()> {
        let graph = self.graph;
        let bound: Vec<&'a TaskConfig> = graph.bound_to(event).collect();
        for task in bound {
            // A task bound to several events runs on the first one only.
            if !self.visited.insert(task.name.clone()) {
                continue;
            }
            self.schedule(Some(event), task)?;
        }
        Ok(())
    }

    fn schedule(&mut self, event: Option<&str>, task: &'a TaskConfig) -> Result<()> {
        if task.runs_in_stage(&self.stage.name) {
            let step = self.render(event, task)?;
            self.steps.push(step);
        } else {
            debug!(
                task = %task.name,
                stage = %self.stage.name,
                "task not enabled for this stage; skipping"
            );
        }

        // Chained hook: tasks declared to run after this one.
        self.fire(&task.name)
    }

    fn render(&self, event: Option<&str>, task: &TaskConfig) -> Result<PlannedStep> {
        let mut env: BTreeMap<String, String> = self.stage.env.clone();
        env.extend(task.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let commands = task
            .commands
            .iter()
            .map(|spec| render_command(spec, &env, &self.stage.vars))
            .collect::<Result<Vec<_>>>()?;

        let hosts = self
            .stage
            .hosts
            .iter()
            .filter(|h| h.matches_roles(&task.roles))
            .cloned()
            .collect();

        Ok(PlannedStep {
            event: event.map(|e| e.to_string()),
            task: task.name.clone(),
            desc: task.desc.clone(),
            hosts,
            commands,
            timeout: task.effective_timeout(self.default_timeout),
        })
    }
}
