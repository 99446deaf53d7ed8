// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::TaskConfig;
use crate::errors::{DeployError, Result};

/// Reserved target name that walks the whole lifecycle flow.
pub const DEPLOY_TARGET: &str = "deploy";

/// Registry of tasks and the hooks they are bound to.
///
/// Nodes are lifecycle events (from `[config].flow`) and task names; every
/// task name is also an event that fires once the task has finished on all
/// hosts. An `after = ["X"]` declaration is an edge `X -> task`.
///
/// Tasks keep their registration order, which is the order a hook runs them
/// in.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    flow: Vec<String>,
    tasks: Vec<TaskConfig>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Empty graph over the given lifecycle events.
    pub fn new(flow: Vec<String>) -> Self {
        Self {
            flow,
            tasks: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register every task, then validate the whole graph.
    pub fn from_tasks(flow: Vec<String>, tasks: impl IntoIterator<Item = TaskConfig>) -> Result<Self> {
        let mut graph = Self::new(flow);
        for task in tasks {
            graph.register(task)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Add a task. Fails with `DuplicateTaskName` if the name is taken.
    ///
    /// Hook references are not checked here (a task may name a task that is
    /// registered later); call [`TaskGraph::validate`] once all are in.
    pub fn register(&mut self, mut task: TaskConfig) -> Result<()> {
        task.name = task.name.trim().to_string();
        let name = task.name.as_str();
        if name.is_empty() {
            return Err(DeployError::ConfigError(
                "task with an empty name".to_string(),
            ));
        }
        if self.index.contains_key(name) {
            return Err(DeployError::DuplicateTaskName(name.to_string()));
        }
        if name == DEPLOY_TARGET || self.is_flow_event(name) {
            return Err(DeployError::ConfigError(format!(
                "task name '{name}' is reserved for a lifecycle event"
            )));
        }

        self.index.insert(name.to_string(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Check hook references and acyclicity.
    pub fn validate(&self) -> Result<()> {
        // Tasks with an empty `after` are legal: they only run when named
        // as the target.
        for task in self.tasks.iter() {
            for event in task.after.iter() {
                if event == &task.name {
                    return Err(DeployError::CyclicTaskDependency(format!(
                        "task '{}' cannot run after itself",
                        task.name
                    )));
                }
                if !self.is_event(event) {
                    return Err(DeployError::ConfigError(format!(
                        "task '{}' runs after unknown event '{}'",
                        task.name, event
                    )));
                }
            }
        }

        // Edge direction: event -> task. For
        //   [[task]]
        //   name = "start"
        //   after = ["compile"]
        // we add edge compile -> start.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for event in self.flow.iter() {
            graph.add_node(event.as_str());
        }
        for task in self.tasks.iter() {
            graph.add_node(task.name.as_str());
        }
        for task in self.tasks.iter() {
            for event in task.after.iter() {
                graph.add_edge(event.as_str(), task.name.as_str(), ());
            }
        }

        // A topological sort will fail if there is a cycle.
        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(DeployError::CyclicTaskDependency(format!(
                "cycle detected in task hooks involving task '{}'",
                cycle.node_id()
            ))),
        }
    }

    /// Lifecycle events in flow order.
    pub fn flow(&self) -> &[String] {
        &self.flow
    }

    pub fn is_flow_event(&self, name: &str) -> bool {
        self.flow.iter().any(|e| e == name)
    }

    /// Whether tasks can be bound to `name` (a flow event or a task).
    pub fn is_event(&self, name: &str) -> bool {
        self.is_flow_event(name) || self.index.contains_key(name)
    }

    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// All tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskConfig> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks declared to run after `event`, in registration order.
    pub fn bound_to<'a>(&'a self, event: &str) -> impl Iterator<Item = &'a TaskConfig> {
        self.tasks
            .iter()
            .filter(move |t| t.after.iter().any(|e| e == event))
    }
}
