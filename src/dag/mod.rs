// src/dag/mod.rs

//! Task graph and planning.
//!
//! - [`graph`] holds the task registry, hook bindings and DAG validation.
//! - [`plan`] expands a target (`deploy`, a lifecycle event or a task) into
//!   an ordered list of rendered steps for one stage.

pub mod graph;
pub mod plan;

pub use graph::{DEPLOY_TARGET, TaskGraph};
pub use plan::{Plan, PlannedStep, plan_target};
